//! Policy output distributions.
//!
//! The policy network produces the parameters of an action distribution;
//! everything downstream (surrogates, KL, Fisher products) talks to the
//! distribution through [`PolicyOutputDistribution`].
//!
//! # Diagonal Gaussian
//!
//! ```text
//! log π(a|s) = Σᵢ [ -½((aᵢ-μᵢ)/σᵢ)² - log σᵢ - ½ log 2π ]
//! H(π)       = Σᵢ log σᵢ + ½ D (1 + log 2π)
//! KL(p ‖ q)  = Σᵢ [ log σqᵢ - log σpᵢ + (σpᵢ² + (μpᵢ-μqᵢ)²) / (2σqᵢ²) - ½ ]
//! ```

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Distribution, Tensor};

/// Lower bound applied to log standard deviations.
pub const LOG_STD_MIN: f32 = -20.0;
/// Upper bound applied to log standard deviations.
pub const LOG_STD_MAX: f32 = 2.0;

/// Action distribution produced by a policy for a batch of observations.
///
/// Only the diagonal Gaussian exists today; new variants must provide the
/// same capability set.
#[derive(Debug, Clone)]
pub enum PolicyOutputDistribution<B: Backend> {
    /// Independent Gaussian per action dimension.
    DiagGaussian {
        /// `[batch, action_dim]`
        mean: Tensor<B, 2>,
        /// `[batch, action_dim]`, clamped to `[LOG_STD_MIN, LOG_STD_MAX]`
        log_std: Tensor<B, 2>,
    },
}

impl<B: Backend> PolicyOutputDistribution<B> {
    /// Build a diagonal Gaussian, clamping `log_std` for stability.
    pub fn diag_gaussian(mean: Tensor<B, 2>, log_std: Tensor<B, 2>) -> Self {
        Self::DiagGaussian {
            mean,
            log_std: log_std.clamp(LOG_STD_MIN, LOG_STD_MAX),
        }
    }

    /// Build a diagonal Gaussian from explicit standard deviations.
    pub fn from_mean_std(mean: Tensor<B, 2>, std: Tensor<B, 2>) -> Self {
        Self::diag_gaussian(mean, std.log())
    }

    pub fn mean(&self) -> Tensor<B, 2> {
        match self {
            Self::DiagGaussian { mean, .. } => mean.clone(),
        }
    }

    pub fn log_std(&self) -> Tensor<B, 2> {
        match self {
            Self::DiagGaussian { log_std, .. } => log_std.clone(),
        }
    }

    pub fn stddev(&self) -> Tensor<B, 2> {
        self.log_std().exp()
    }

    pub fn batch_size(&self) -> usize {
        match self {
            Self::DiagGaussian { mean, .. } => mean.dims()[0],
        }
    }

    pub fn action_dim(&self) -> usize {
        match self {
            Self::DiagGaussian { mean, .. } => mean.dims()[1],
        }
    }

    /// Log-density of `actions`, summed over action dimensions: `[batch]`.
    pub fn log_prob(&self, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            Self::DiagGaussian { mean, log_std } => {
                let batch = mean.dims()[0];
                let log_2pi = (2.0 * std::f32::consts::PI).ln();
                let normalized = (actions - mean.clone()) / log_std.clone().exp();
                let per_dim = normalized.powf_scalar(2.0).mul_scalar(-0.5)
                    - log_std.clone()
                    - 0.5 * log_2pi;
                per_dim.sum_dim(1).reshape([batch])
            }
        }
    }

    /// Analytical entropy per sample: `[batch]`.
    pub fn entropy(&self) -> Tensor<B, 1> {
        match self {
            Self::DiagGaussian { log_std, .. } => {
                let [batch, action_dim] = log_std.dims();
                let log_2pi = (2.0 * std::f32::consts::PI).ln();
                let constant = 0.5 * action_dim as f32 * (1.0 + log_2pi);
                log_std.clone().sum_dim(1).reshape([batch]).add_scalar(constant)
            }
        }
    }

    /// Draw one action per row.
    pub fn sample(&self) -> Tensor<B, 2> {
        match self {
            Self::DiagGaussian { mean, log_std } => {
                let noise = Tensor::random(mean.dims(), Distribution::Normal(0.0, 1.0), &mean.device());
                mean.clone() + log_std.clone().exp() * noise
            }
        }
    }

    /// Most likely action (the mean), used for deterministic inference.
    pub fn mode(&self) -> Tensor<B, 2> {
        self.mean()
    }

    /// `KL(self ‖ other)` per sample, summed over action dimensions: `[batch]`.
    pub fn kl_divergence(&self, other: &Self) -> Tensor<B, 1> {
        match (self, other) {
            (
                Self::DiagGaussian { mean, log_std },
                Self::DiagGaussian {
                    mean: other_mean,
                    log_std: other_log_std,
                },
            ) => {
                let batch = mean.dims()[0];
                let var = log_std.clone().mul_scalar(2.0).exp();
                let other_var = other_log_std.clone().mul_scalar(2.0).exp();
                let mean_diff_sq = (mean.clone() - other_mean.clone()).powf_scalar(2.0);

                let per_dim = other_log_std.clone() - log_std.clone()
                    + (var + mean_diff_sq) / other_var.mul_scalar(2.0)
                    - 0.5;
                per_dim.sum_dim(1).reshape([batch])
            }
        }
    }

    /// Mean `KL(self ‖ other)` over the batch.
    pub fn mean_kl(&self, other: &Self) -> Tensor<B, 1> {
        self.kl_divergence(other).mean()
    }

    /// Copy of the distribution cut from the autodiff graph.
    pub fn detach(&self) -> Self {
        match self {
            Self::DiagGaussian { mean, log_std } => Self::DiagGaussian {
                mean: mean.clone().detach(),
                log_std: log_std.clone().detach(),
            },
        }
    }

    /// Select rows of the batch.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        match self {
            Self::DiagGaussian { mean, log_std } => {
                let device = mean.device();
                let idx: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
                let idx = Tensor::<B, 1, burn::tensor::Int>::from_ints(idx.as_slice(), &device);
                Self::DiagGaussian {
                    mean: mean.clone().select(0, idx.clone()),
                    log_std: log_std.clone().select(0, idx),
                }
            }
        }
    }
}

impl<B: AutodiffBackend> PolicyOutputDistribution<B> {
    /// Strip autodiff tracking, moving the parameters to the inner backend.
    pub fn inner(&self) -> PolicyOutputDistribution<B::InnerBackend> {
        match self {
            Self::DiagGaussian { mean, log_std } => PolicyOutputDistribution::DiagGaussian {
                mean: mean.clone().inner(),
                log_std: log_std.clone().inner(),
            },
        }
    }

    /// Lift an inner-backend distribution as a constant of the graph.
    pub fn from_inner(dist: PolicyOutputDistribution<B::InnerBackend>) -> Self {
        match dist {
            PolicyOutputDistribution::DiagGaussian { mean, log_std } => Self::DiagGaussian {
                mean: Tensor::from_inner(mean),
                log_std: Tensor::from_inner(log_std),
            },
        }
    }
}
