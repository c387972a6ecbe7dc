//! Constrained Policy Optimization.
//!
//! - `config`: hyperparameters and their validation
//! - `critic`: reward / cost critic regression with clipped Adam
//! - `dual`: the five-case dual solve for `(λ, ν)`
//! - `line_search`: backtracking acceptance over a fixed step grid
//! - `cpo`: the per-mini-batch update tying the pieces together

mod config;
#[allow(clippy::module_inception)]
mod cpo;
pub mod critic;
pub mod dual;
mod error;
pub mod line_search;

pub use config::{ConfigError, CpoConfig};
pub use cpo::{Cpo, CpoUpdateStats, PolicyStepStats};
pub use critic::{create_critic_optimizer, regress_critic, CriticBatch};
pub use dual::{solve_dual, DualInputs, DualSolution, OptimCase};
pub use error::CpoError;
pub use line_search::{line_search, AcceptanceCriteria, LineSearchOutcome, LineSearchSchedule};
