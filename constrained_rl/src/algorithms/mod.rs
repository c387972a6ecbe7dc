//! Algorithm components.
//!
//! - `gaussian`: diagonal Gaussian action distribution
//! - `policy`: policy / critic model traits and action selection
//! - `gae`: Generalized Advantage Estimation over `(step, row)` buffers
//! - `conjugate_gradient`: matrix-free CG over a [`LinearOperator`]
//! - `fisher`: damped Fisher-vector product of the policy
//! - `cpo`: Constrained Policy Optimization

pub mod conjugate_gradient;
pub mod cpo;
pub mod fisher;
pub mod gae;
pub mod gaussian;
pub mod policy;

#[cfg(test)]
mod tests;

pub use conjugate_gradient::{conjugate_gradient, LinearOperator, MatrixOperator};
pub use fisher::FisherVectorProduct;
pub use gae::{compute_gae, compute_gae_rows, standardize, GaeEstimate};
pub use gaussian::PolicyOutputDistribution;
pub use policy::{ActionSelection, Critic, CriticInference, Policy, PolicyInference};
