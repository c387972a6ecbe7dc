use thiserror::Error;

use crate::core::flat_params::FlatParamsError;
use crate::runners::rollout_storage::StorageError;

/// Fatal failures of a CPO update.
///
/// A line search that accepts no step is not an error; it yields a zero-length
/// update.
#[derive(Debug, Error)]
pub enum CpoError {
    #[error(transparent)]
    FlatParams(#[from] FlatParamsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The KL between a trial policy and the pre-step policy came out negative
    /// (or NaN): the distribution parameters are numerically corrupt.
    #[error("KL divergence {kl} at step size {step} is negative or not finite")]
    NegativeKl { kl: f32, step: f32 },
    /// A trust-region quantity became NaN or infinite.
    #[error("non-finite {quantity} during policy update")]
    NonFinite { quantity: &'static str },
}
