//! Constrained Policy Optimization update.
//!
//! One call to [`Cpo::update`] consumes a filled [`RolloutStorage`] and, for
//! every mini-batch of every epoch:
//!
//! 1. refits the reward critic, then the cost critic;
//! 2. computes the surrogate gradients `g = ∇(-L)` and `b = ∇C`;
//! 3. solves `v = H⁻¹g` (and `w = H⁻¹b` unless the cost gradient vanishes)
//!    with conjugate gradient on the Fisher operator;
//! 4. solves the dual for `(λ, ν)` and forms the direction `x`;
//! 5. line-searches `θ - e·x` and writes the accepted parameters back.
//!
//! ```text
//!        ┌──────── mini-batch ────────┐
//!        ▼                            ▼
//!  critic / cost critic        policy: g, b ──► CG ──► q, r, s
//!  (Adam, clipped)                              │
//!                                               ▼
//!                                  dual (case 0..4) ──► x
//!                                               │
//!                                               ▼
//!                               line search over linspace(0, 0.01)
//! ```

use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

use super::config::CpoConfig;
use super::critic::{regress_critic, CriticBatch};
use super::dual::{solve_dual, DualInputs, OptimCase, COST_GRADIENT_THRESHOLD};
use super::error::CpoError;
use super::line_search::{
    importance_surrogates, line_search, AcceptanceCriteria, LineSearchSchedule, PolicyTrialEvaluator,
    TrialBatch,
};
use crate::algorithms::conjugate_gradient::{conjugate_gradient, LinearOperator};
use crate::algorithms::fisher::FisherVectorProduct;
use crate::algorithms::gaussian::PolicyOutputDistribution;
use crate::algorithms::policy::{Critic, CriticInference, Policy, PolicyInference};
use crate::core::flat_params::{flat_dot, flat_grad, get_flat_params, set_params};
use crate::runners::rollout_storage::{MinibatchData, RolloutStorage};

// ============================================================================
// Statistics
// ============================================================================

/// Diagnostics of one policy step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyStepStats {
    pub case: OptimCase,
    pub lam: f64,
    pub nu: f64,
    /// Accepted line-search step, `0.0` for a rejected update.
    pub step: f32,
    pub line_search_trials: usize,
    /// Reward surrogate before the step.
    pub surrogate: f32,
    /// Cost surrogate before the step.
    pub surrogate_cost: f32,
    /// KL between the updated and the pre-step policy.
    pub kl: f32,
    /// KL between the updated policy and the behaviour policy of the rollout.
    pub behaviour_kl: f32,
}

/// Averages over all mini-batch updates of one [`Cpo::update`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpoUpdateStats {
    pub mean_value_loss: f32,
    pub mean_cost_value_loss: f32,
    pub mean_surrogate: f32,
    pub mean_surrogate_cost: f32,
    pub mean_kl: f32,
    pub mean_behaviour_kl: f32,
    pub mean_step: f32,
    /// Updates whose line search accepted a zero step.
    pub zero_steps: usize,
    /// How often each optimisation case (0..=4) was selected.
    pub case_counts: [usize; 5],
    pub num_updates: usize,
}

impl CpoUpdateStats {
    fn accumulate(&mut self, value_loss: f32, cost_value_loss: f32, step: &PolicyStepStats) {
        self.mean_value_loss += value_loss;
        self.mean_cost_value_loss += cost_value_loss;
        self.mean_surrogate += step.surrogate;
        self.mean_surrogate_cost += step.surrogate_cost;
        self.mean_kl += step.kl;
        self.mean_behaviour_kl += step.behaviour_kl;
        self.mean_step += step.step;
        if step.step == 0.0 {
            self.zero_steps += 1;
        }
        self.case_counts[step.case.index() as usize] += 1;
        self.num_updates += 1;
    }

    fn finish(mut self) -> Self {
        let n = self.num_updates.max(1) as f32;
        self.mean_value_loss /= n;
        self.mean_cost_value_loss /= n;
        self.mean_surrogate /= n;
        self.mean_surrogate_cost /= n;
        self.mean_kl /= n;
        self.mean_behaviour_kl /= n;
        self.mean_step /= n;
        self
    }

    /// Every reported scalar is finite.
    pub fn is_finite(&self) -> bool {
        [
            self.mean_value_loss,
            self.mean_cost_value_loss,
            self.mean_surrogate,
            self.mean_surrogate_cost,
            self.mean_kl,
            self.mean_behaviour_kl,
            self.mean_step,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

// ============================================================================
// Cpo
// ============================================================================

/// Trainer state: the three networks, the critics' optimizers and the
/// hyperparameters.
pub struct Cpo<B, P, C, O>
where
    B: AutodiffBackend,
    P: Policy<B>,
    C: Critic<B>,
    O: Optimizer<C, B>,
{
    config: CpoConfig,
    policy: P,
    critic: C,
    cost_critic: C,
    critic_optimizer: O,
    cost_critic_optimizer: O,
    schedule: LineSearchSchedule,
    device: B::Device,
}

impl<B, P, C, O> Cpo<B, P, C, O>
where
    B: AutodiffBackend,
    P: Policy<B>,
    P::InnerModule: PolicyInference<B::InnerBackend>,
    C: Critic<B>,
    C::InnerModule: CriticInference<B::InnerBackend>,
    O: Optimizer<C, B>,
{
    /// Assemble the trainer. Each critic gets its own optimizer instance.
    pub fn new(
        config: CpoConfig,
        policy: P,
        critic: C,
        cost_critic: C,
        critic_optimizer: O,
        cost_critic_optimizer: O,
        device: B::Device,
    ) -> Self {
        let schedule = LineSearchSchedule::linspace(config.max_step_size, config.line_search_steps);
        Self {
            config,
            policy,
            critic,
            cost_critic,
            critic_optimizer,
            cost_critic_optimizer,
            schedule,
            device,
        }
    }

    pub fn config(&self) -> &CpoConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn critic(&self) -> &C {
        &self.critic
    }

    pub fn cost_critic(&self) -> &C {
        &self.cost_critic
    }

    /// Replace the policy, e.g. after loading a checkpoint.
    pub fn set_policy(&mut self, policy: P) {
        self.policy = policy;
    }

    /// Inference copies of the three networks.
    pub fn inference_models(&self) -> (P::InnerModule, C::InnerModule, C::InnerModule) {
        (self.policy.valid(), self.critic.valid(), self.cost_critic.valid())
    }

    /// Run all epochs over the stored rollout.
    ///
    /// `violation` is the constraint state `c` of this rollout. Returns
    /// averaged diagnostics; fails only on fatal numerical faults.
    pub fn update(
        &mut self,
        storage: &RolloutStorage,
        violation: f32,
    ) -> Result<CpoUpdateStats, CpoError> {
        let batches = storage.mini_batch_generator(self.config.num_mini_batches, self.config.sampler)?;
        let mut stats = CpoUpdateStats::default();

        for epoch in 0..self.config.num_learning_epochs {
            for indices in &batches {
                let data = storage.minibatch(indices)?;

                let (value_loss, cost_value_loss) = self.update_critics(&data);
                let step = self.policy_step(&data, violation)?;

                log::debug!(
                    "epoch {} | {} | lam {:.4} nu {:.4} | step {:.5} after {} trials | kl {:.5}",
                    epoch,
                    step.case,
                    step.lam,
                    step.nu,
                    step.step,
                    step.line_search_trials,
                    step.kl
                );
                stats.accumulate(value_loss, cost_value_loss, &step);
            }
        }

        Ok(stats.finish())
    }

    fn update_critics(&mut self, data: &MinibatchData) -> (f32, f32) {
        let obs = data.observations_tensor::<B>(&self.device);
        let states = data.states_tensor::<B>(&self.device);
        let lr = self.config.critic_learning_rate;
        let l2 = self.config.critic_l2_coef;

        let reward_batch = CriticBatch {
            obs: obs.clone(),
            states: states.clone(),
            targets: data.returns_tensor::<B>(&self.device),
        };
        let (critic, value_loss) =
            regress_critic(self.critic.clone(), &mut self.critic_optimizer, &reward_batch, l2, lr);
        self.critic = critic;

        let cost_batch = CriticBatch {
            obs,
            states,
            targets: data.cost_returns_tensor::<B>(&self.device),
        };
        let (cost_critic, cost_value_loss) = regress_critic(
            self.cost_critic.clone(),
            &mut self.cost_critic_optimizer,
            &cost_batch,
            l2,
            lr,
        );
        self.cost_critic = cost_critic;

        (value_loss, cost_value_loss)
    }

    /// Reward and cost surrogates at the current parameters, on the graph.
    fn surrogates(&self, batch: &TrialBatch<B::InnerBackend>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let dist = self.policy.forward(
            Tensor::from_inner(batch.obs.clone()),
            batch.states.clone().map(Tensor::from_inner),
        );
        importance_surrogates(
            dist.log_prob(Tensor::from_inner(batch.actions.clone())),
            Tensor::from_inner(batch.old_log_prob.clone()),
            Tensor::from_inner(batch.advantages.clone()),
            Tensor::from_inner(batch.cost_advantages.clone()),
        )
    }

    fn policy_step(&mut self, data: &MinibatchData, violation: f32) -> Result<PolicyStepStats, CpoError> {
        let device = self.device.clone();
        let batch = TrialBatch::<B::InnerBackend> {
            obs: data.observations_tensor(&device),
            states: data.states_tensor(&device),
            actions: data.actions_tensor(&device),
            old_log_prob: data.old_log_probs_tensor(&device),
            advantages: data.advantages_tensor(&device),
            cost_advantages: data.cost_advantages_tensor(&device),
        };

        // Each gradient consumes its graph, so each gets its own forward pass.
        let (surrogate, _) = self.surrogates(&batch);
        let surrogate_value = surrogate.clone().into_scalar().elem::<f32>();
        let g = flat_grad(surrogate.neg(), &self.policy)?;

        let (_, surrogate_cost) = self.surrogates(&batch);
        let surrogate_cost_value = surrogate_cost.clone().into_scalar().elem::<f32>();
        let b = flat_grad(surrogate_cost, &self.policy)?;

        let theta = get_flat_params(&self.policy.valid())?;
        let fvp = FisherVectorProduct::new(
            &self.policy,
            theta.clone(),
            batch.obs.clone(),
            batch.states.clone(),
            self.config.damping,
        );
        let reference = fvp.reference().clone();
        let iterations = self.config.cg_iterations;

        let v = conjugate_gradient(&fvp, &g, iterations)?;
        let approx_g = fvp.apply(&v)?;
        let q = flat_dot(&v, &approx_g) as f64;

        let c = violation as f64;
        let cost_grad_sq_norm = flat_dot(&b, &b) as f64;
        let (w, r, s) = if cost_grad_sq_norm <= COST_GRADIENT_THRESHOLD && c < 0.0 {
            (None, 0.0, 0.0)
        } else {
            let w = conjugate_gradient(&fvp, &b, iterations)?;
            let r = flat_dot(&approx_g, &w) as f64;
            let s = flat_dot(&w, &fvp.apply(&w)?) as f64;
            (Some(w), r, s)
        };

        if !(q.is_finite() && r.is_finite() && s.is_finite()) {
            return Err(CpoError::NonFinite {
                quantity: "trust-region reductions",
            });
        }

        let dual = solve_dual(&DualInputs {
            q,
            r,
            s,
            c,
            cost_grad_sq_norm,
            max_kl: self.config.max_kl as f64,
        });
        if !dual.is_finite() {
            return Err(CpoError::NonFinite {
                quantity: "dual multipliers",
            });
        }
        match dual.case {
            OptimCase::FeasibleRecovery => log::warn!("attempting feasible recovery (c = {:.4})", c),
            OptimCase::InfeasibleRecovery => log::warn!("attempting infeasible recovery (c = {:.4})", c),
            _ => {}
        }

        let direction = dual.search_direction(&v, w.as_ref());
        let criteria = AcceptanceCriteria {
            max_kl: self.config.max_kl,
            case: dual.case,
            surrogate: surrogate_value,
            surrogate_cost: surrogate_cost_value,
            violation,
        };

        let template = self.policy.valid();
        let evaluator = PolicyTrialEvaluator::new(&template, &theta, &direction, &batch, &reference);
        let outcome = line_search(&evaluator, &self.schedule, &criteria)?;

        let updated = evaluator.parameters_at(outcome.step);
        self.policy = set_params(self.policy.clone(), Tensor::from_inner(updated))?;

        let behaviour = PolicyOutputDistribution::from_mean_std(
            data.old_means_tensor(&device),
            data.old_stds_tensor(&device),
        );
        let current = self.policy.valid().forward(batch.obs.clone(), batch.states.clone());
        let behaviour_kl = current.mean_kl(&behaviour).into_scalar().elem::<f32>();

        Ok(PolicyStepStats {
            case: dual.case,
            lam: dual.lam,
            nu: dual.nu,
            step: outcome.step,
            line_search_trials: outcome.trials,
            surrogate: surrogate_value,
            surrogate_cost: surrogate_cost_value,
            kl: outcome.accepted.map(|t| t.kl).unwrap_or(0.0),
            behaviour_kl,
        })
    }
}
