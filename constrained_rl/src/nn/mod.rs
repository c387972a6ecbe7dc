//! Default actor and critic networks.
//!
//! - [`init`]: orthogonal initialization with per-layer gains
//! - [`mlp`]: ELU multilayer perceptrons for the Gaussian policy and both critics

pub mod init;
pub mod mlp;

pub use init::{orthogonal_linear, orthogonal_matrix, HIDDEN_GAIN, POLICY_HEAD_GAIN, VALUE_HEAD_GAIN};
pub use mlp::{elu, MlpConfig, MlpCritic, MlpGaussianPolicy};
