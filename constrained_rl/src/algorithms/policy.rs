//! Model traits for the safe actor-critic trio.
//!
//! CPO trains three networks: a stochastic policy, a reward critic and a
//! cost critic. Each role has an inference trait that works on any
//! [`Backend`] and a training marker that adds [`AutodiffModule`].
//!
//! - Rollout collection calls the inference traits on `model.valid()`, so no
//!   autodiff graph is built while stepping environments.
//! - The update calls them on the autodiff module for gradients, and on the
//!   inner module for the Fisher operator and line-search trials.
//!
//! Both inference traits receive an optional privileged `states` batch. It is
//! `Some` only when the trainer runs with asymmetric critics; models are free
//! to ignore it.

use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

use super::gaussian::PolicyOutputDistribution;

// ============================================================================
// Policy
// ============================================================================

/// Stochastic policy: observations to an action distribution.
pub trait PolicyInference<B: Backend>: Module<B> + Clone + Send + 'static {
    /// Distribution over actions for a batch `[batch, obs_size]`.
    fn forward(
        &self,
        obs: Tensor<B, 2>,
        states: Option<Tensor<B, 2>>,
    ) -> PolicyOutputDistribution<B>;

    /// Observation size expected by the model.
    fn obs_size(&self) -> usize;

    /// Number of action dimensions produced.
    fn action_dim(&self) -> usize;
}

/// Training marker for policies.
pub trait Policy<B: AutodiffBackend>: PolicyInference<B> + AutodiffModule<B> {}

impl<B, M> Policy<B> for M
where
    B: AutodiffBackend,
    M: PolicyInference<B> + AutodiffModule<B>,
{
}

// ============================================================================
// Critic
// ============================================================================

/// State-value estimator. Used for both reward and cost values.
pub trait CriticInference<B: Backend>: Module<B> + Clone + Send + 'static {
    /// Value estimates for a batch: `[batch]`.
    fn forward(&self, obs: Tensor<B, 2>, states: Option<Tensor<B, 2>>) -> Tensor<B, 1>;
}

/// Training marker for critics.
pub trait Critic<B: AutodiffBackend>: CriticInference<B> + AutodiffModule<B> {}

impl<B, M> Critic<B> for M
where
    B: AutodiffBackend,
    M: CriticInference<B> + AutodiffModule<B>,
{
}

// ============================================================================
// Action selection
// ============================================================================

/// How actions are drawn from the policy distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionSelection {
    /// Sample from the distribution (training rollouts).
    #[default]
    Stochastic,
    /// Use the distribution mode (evaluation / play).
    Deterministic,
}

impl ActionSelection {
    pub fn select<B: Backend>(&self, dist: &PolicyOutputDistribution<B>) -> Tensor<B, 2> {
        match self {
            Self::Stochastic => dist.sample(),
            Self::Deterministic => dist.mode(),
        }
    }
}
