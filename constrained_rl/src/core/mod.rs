//! Core types shared by the algorithms and the runner.
//!
//! - [`flat_params`]: module ⇄ flat parameter vector conversion and flat gradients
//! - [`episode_stats`]: per-row episode sums, rolling windows and the constraint estimate

pub mod episode_stats;
pub mod flat_params;

pub use episode_stats::{
    CompletedEpisode, ConstraintEstimate, EpisodeTracker, RollingWindow, EPISODE_WINDOW, NEUTRAL_VIOLATION,
};
pub use flat_params::{
    flat_dot, flat_grad, flat_norm, flatten, get_flat_params, num_params, set_params, squared_l2_norm,
    FlatParamsError,
};
