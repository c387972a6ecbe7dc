//! Constrained line search along the CPO direction.
//!
//! Candidate steps come from a fixed linear grid over `[0, max_step]`, tried
//! largest first. A candidate `e` moves the policy to `θ - e·x` and is
//! accepted when all three predicates hold:
//!
//! ```text
//! KL(π_e ‖ π_θ)            ≤ δ
//! L(π_e) ≥ L(π_θ)            (only when the pre-step policy was feasible)
//! C(π_e) - C(π_θ)          ≤ max(-c, 0)
//! ```
//!
//! where `L` and `C` are the importance-weighted reward and cost surrogates.
//! The grid contains `e = 0`; if even that fails the search reports a zero
//! step and the policy keeps its pre-update parameters.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use super::dual::OptimCase;
use super::error::CpoError;
use crate::algorithms::gaussian::PolicyOutputDistribution;
use crate::algorithms::policy::PolicyInference;
use crate::core::flat_params::set_params;

/// KL values in `[-KL_TOLERANCE, 0)` are float round-off and read as zero.
pub const KL_TOLERANCE: f32 = 1e-6;

// ============================================================================
// Schedule
// ============================================================================

/// Step sizes, stored largest first.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSearchSchedule {
    steps: Vec<f32>,
}

impl LineSearchSchedule {
    /// `n` evenly spaced points in `[0, max_step]`, both ends included.
    pub fn linspace(max_step: f32, n: usize) -> Self {
        let steps = match n {
            0 => Vec::new(),
            1 => vec![0.0],
            _ => {
                let last = (n - 1) as f32;
                (0..n).rev().map(|i| max_step * i as f32 / last).collect()
            }
        };
        Self { steps }
    }

    pub fn steps(&self) -> &[f32] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ============================================================================
// Trials
// ============================================================================

/// Quantities measured at one candidate step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialMetrics {
    /// Mean KL to the pre-step policy.
    pub kl: f32,
    /// Reward surrogate `mean(ratio · A)`.
    pub surrogate: f32,
    /// Cost surrogate `mean(ratio · A_c)`.
    pub surrogate_cost: f32,
}

/// Evaluates the policy at `θ - step·x`.
pub trait TrialEvaluator {
    fn evaluate(&self, step: f32) -> Result<TrialMetrics, CpoError>;
}

/// The three acceptance predicates, fixed for one search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceCriteria {
    pub max_kl: f32,
    pub case: OptimCase,
    /// Reward surrogate before the step.
    pub surrogate: f32,
    /// Cost surrogate before the step.
    pub surrogate_cost: f32,
    /// Constraint violation `c`.
    pub violation: f32,
}

impl AcceptanceCriteria {
    /// Allowed increase of the cost surrogate.
    pub fn cost_slack(&self) -> f32 {
        (-self.violation).max(0.0)
    }

    pub fn accepts(&self, trial: &TrialMetrics) -> bool {
        let within_trust_region = trial.kl <= self.max_kl;
        let return_kept = !self.case.starts_feasible() || trial.surrogate >= self.surrogate;
        let cost_kept = trial.surrogate_cost - self.surrogate_cost <= self.cost_slack();
        within_trust_region && return_kept && cost_kept
    }
}

/// Result of a line search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchOutcome {
    /// Accepted step size, `0.0` when nothing was accepted.
    pub step: f32,
    /// Metrics of the accepted candidate.
    pub accepted: Option<TrialMetrics>,
    /// Number of candidates evaluated.
    pub trials: usize,
}

impl LineSearchOutcome {
    pub fn is_zero_step(&self) -> bool {
        self.step == 0.0
    }
}

fn checked_kl(kl: f32, step: f32) -> Result<f32, CpoError> {
    if !kl.is_finite() || kl < -KL_TOLERANCE {
        return Err(CpoError::NegativeKl { kl, step });
    }
    Ok(kl.max(0.0))
}

/// Return the first (largest) accepted step of `schedule`.
///
/// A negative or NaN KL aborts the search with [`CpoError::NegativeKl`].
pub fn line_search<E: TrialEvaluator + ?Sized>(
    evaluator: &E,
    schedule: &LineSearchSchedule,
    criteria: &AcceptanceCriteria,
) -> Result<LineSearchOutcome, CpoError> {
    for (i, &step) in schedule.steps().iter().enumerate() {
        let mut trial = evaluator.evaluate(step)?;
        trial.kl = checked_kl(trial.kl, step)?;

        if criteria.accepts(&trial) {
            return Ok(LineSearchOutcome {
                step,
                accepted: Some(trial),
                trials: i + 1,
            });
        }
    }

    log::warn!(
        "line search found no acceptable step ({}), keeping current policy",
        criteria.case
    );
    Ok(LineSearchOutcome {
        step: 0.0,
        accepted: None,
        trials: schedule.len(),
    })
}

// ============================================================================
// Policy evaluator
// ============================================================================

/// `mean(ratio · adv)` and `mean(ratio · cost_adv)` with
/// `ratio = exp(log_prob - old_log_prob)`.
pub fn importance_surrogates<B: Backend>(
    log_prob: Tensor<B, 1>,
    old_log_prob: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    cost_advantages: Tensor<B, 1>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let ratio = (log_prob - old_log_prob).exp();
    let surrogate = (ratio.clone() * advantages).mean();
    let surrogate_cost = (ratio * cost_advantages).mean();
    (surrogate, surrogate_cost)
}

/// Mini-batch inputs of a trial evaluation.
#[derive(Debug, Clone)]
pub struct TrialBatch<B: Backend> {
    pub obs: Tensor<B, 2>,
    pub states: Option<Tensor<B, 2>>,
    pub actions: Tensor<B, 2>,
    pub old_log_prob: Tensor<B, 1>,
    pub advantages: Tensor<B, 1>,
    pub cost_advantages: Tensor<B, 1>,
}

/// Evaluates a copy of the policy at `θ - step·x` on one mini-batch.
///
/// `reference` is the distribution at θ, computed before the step.
pub struct PolicyTrialEvaluator<'a, B: Backend, P: PolicyInference<B>> {
    template: &'a P,
    theta: &'a Tensor<B, 1>,
    direction: &'a Tensor<B, 1>,
    batch: &'a TrialBatch<B>,
    reference: &'a PolicyOutputDistribution<B>,
}

impl<'a, B: Backend, P: PolicyInference<B>> PolicyTrialEvaluator<'a, B, P> {
    pub fn new(
        template: &'a P,
        theta: &'a Tensor<B, 1>,
        direction: &'a Tensor<B, 1>,
        batch: &'a TrialBatch<B>,
        reference: &'a PolicyOutputDistribution<B>,
    ) -> Self {
        Self {
            template,
            theta,
            direction,
            batch,
            reference,
        }
    }

    /// Flat parameters `θ - step·x`.
    pub fn parameters_at(&self, step: f32) -> Tensor<B, 1> {
        self.theta.clone() - self.direction.clone().mul_scalar(step)
    }
}

impl<B: Backend, P: PolicyInference<B>> TrialEvaluator for PolicyTrialEvaluator<'_, B, P> {
    fn evaluate(&self, step: f32) -> Result<TrialMetrics, CpoError> {
        let model = set_params(self.template.clone(), self.parameters_at(step))?;
        let dist = model.forward(self.batch.obs.clone(), self.batch.states.clone());

        let kl = dist.mean_kl(self.reference);
        let (surrogate, surrogate_cost) = importance_surrogates(
            dist.log_prob(self.batch.actions.clone()),
            self.batch.old_log_prob.clone(),
            self.batch.advantages.clone(),
            self.batch.cost_advantages.clone(),
        );

        Ok(TrialMetrics {
            kl: kl.into_scalar().elem::<f32>(),
            surrogate: surrogate.into_scalar().elem::<f32>(),
            surrogate_cost: surrogate_cost.into_scalar().elem::<f32>(),
        })
    }
}
