//! Reward and cost critic regression.
//!
//! Each critic is an ordinary regressor onto its GAE returns:
//!
//! ```text
//! L(φ) = mean((R - V_φ(s))²) + l2 · Σ φ²
//! ```
//!
//! minimised with Adam under global gradient-norm clipping. The two critics
//! keep independent optimizers.

use burn::grad_clipping::GradientClippingConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

use super::config::CpoConfig;
use crate::algorithms::policy::Critic;
use crate::core::flat_params::squared_l2_norm;

/// Adam (ε = 1e-5) with gradient-norm clipping at `config.max_grad_norm`.
pub fn create_critic_optimizer<B, C>(config: &CpoConfig) -> impl Optimizer<C, B>
where
    B: AutodiffBackend,
    C: Critic<B>,
{
    AdamConfig::new()
        .with_epsilon(1e-5)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(config.max_grad_norm)))
        .init()
}

/// Regression targets for one mini-batch.
#[derive(Debug, Clone)]
pub struct CriticBatch<B: AutodiffBackend> {
    pub obs: Tensor<B, 2>,
    pub states: Option<Tensor<B, 2>>,
    /// Bootstrapped returns `[batch]`.
    pub targets: Tensor<B, 1>,
}

/// One optimizer step on a critic. Returns the updated critic and the loss
/// (squared error plus penalty) before the step.
pub fn regress_critic<B, C, O>(
    critic: C,
    optimizer: &mut O,
    batch: &CriticBatch<B>,
    l2_coef: f32,
    learning_rate: f64,
) -> (C, f32)
where
    B: AutodiffBackend,
    C: Critic<B>,
    O: Optimizer<C, B>,
{
    let predictions = critic.forward(batch.obs.clone(), batch.states.clone());
    let squared_error = (batch.targets.clone() - predictions).powf_scalar(2.0).mean();

    let loss = match squared_l2_norm(&critic) {
        Some(penalty) => squared_error + penalty.mul_scalar(l2_coef),
        None => squared_error,
    };
    let loss_value = loss.clone().into_scalar().elem::<f32>();

    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &critic);
    let critic = optimizer.step(learning_rate, critic, grads);

    (critic, loss_value)
}
