//! CPO training loop over a vectorized environment.
//!
//! `CpoRunner` is the trainer context: it owns the algorithm state, the
//! environment batch, the rollout storage and the episode statistics, and
//! drives the on-policy cycle
//!
//! ```text
//!  ┌─► collect_rollout ──► compute GAE ──► Cpo::update ──► clear ─┐
//!  │   (num_transitions_per_env steps × rows)                     │
//!  └──────────────── log, checkpoint, iteration += 1 ◄────────────┘
//! ```
//!
//! Rows are `(env, agent)` pairs. The constraint violation handed to the
//! update is measured on the episodes completed during the rollout only.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::optim::Optimizer;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use thiserror::Error;

use crate::algorithms::cpo::{ConfigError, Cpo, CpoError, CpoUpdateStats};
use crate::algorithms::policy::{ActionSelection, Critic, CriticInference, Policy, PolicyInference};
use crate::checkpoint::{load_checkpoint, CheckpointError, Checkpointer};
use crate::core::episode_stats::{CompletedEpisode, ConstraintEstimate, EpisodeTracker};
use crate::environment::{EnvError, Frame, RenderMode, VecEnv};
use crate::metrics::{MetricsLogger, TrainingSnapshot};

use super::rollout_storage::{RolloutStorage, StepRecord, StorageError, StorageStatistics};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Cpo(#[from] CpoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("policy expects {model} {what}, environment provides {env}")]
    ShapeMismatch {
        what: &'static str,
        model: usize,
        env: usize,
    },
}

/// Outcome of one rollout.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutSummary {
    pub completed: Vec<CompletedEpisode>,
    pub constraint: ConstraintEstimate,
    pub statistics: StorageStatistics,
}

/// Host-side output of one batched policy/critic query.
struct StepQuery {
    actions: Vec<f32>,
    log_probs: Vec<f32>,
    means: Vec<f32>,
    stds: Vec<f32>,
    values: Vec<f32>,
    cost_values: Vec<f32>,
}

fn to_vec<B: Backend, const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    t.into_data().iter::<f32>().collect()
}

pub struct CpoRunner<B, P, C, O, V>
where
    B: AutodiffBackend,
    P: Policy<B>,
    C: Critic<B>,
    O: Optimizer<C, B>,
    V: VecEnv,
{
    cpo: Cpo<B, P, C, O>,
    envs: V,
    storage: RolloutStorage,
    tracker: EpisodeTracker,
    obs: Vec<f32>,
    shared_obs: Vec<f32>,
    iteration: usize,
    env_steps: usize,
    logger: Option<Box<dyn MetricsLogger>>,
    checkpointer: Option<Checkpointer>,
}

impl<B, P, C, O, V> CpoRunner<B, P, C, O, V>
where
    B: AutodiffBackend,
    P: Policy<B>,
    P::InnerModule: PolicyInference<B::InnerBackend>,
    C: Critic<B>,
    C::InnerModule: CriticInference<B::InnerBackend>,
    O: Optimizer<C, B>,
    V: VecEnv,
{
    /// Validate the configuration against the batch and reset every
    /// environment.
    pub fn new(cpo: Cpo<B, P, C, O>, mut envs: V) -> Result<Self, RunnerError> {
        let config = cpo.config().clone();
        let rows = envs.num_rows();
        config.validate()?;
        config.validate_batch(rows)?;

        let spaces = envs.spaces().clone();
        let policy = cpo.policy();
        if policy.obs_size() != spaces.obs_size() {
            return Err(RunnerError::ShapeMismatch {
                what: "observation features",
                model: policy.obs_size(),
                env: spaces.obs_size(),
            });
        }
        if policy.action_dim() != spaces.action_dim() {
            return Err(RunnerError::ShapeMismatch {
                what: "action dimensions",
                model: policy.action_dim(),
                env: spaces.action_dim(),
            });
        }

        let state_size = config.asymmetric.then(|| spaces.shared_obs_size());
        let storage = RolloutStorage::new(
            rows,
            config.num_transitions_per_env,
            spaces.obs_size(),
            state_size,
            spaces.action_dim(),
        );

        let reset = envs.reset()?;
        println!(
            "CPO: {} envs x {} agents, {} steps per rollout, cost limit {}",
            envs.num_envs(),
            envs.n_agents(),
            config.num_transitions_per_env,
            config.cost_limit
        );

        Ok(Self {
            cpo,
            envs,
            storage,
            tracker: EpisodeTracker::new(rows),
            obs: reset.obs.data,
            shared_obs: reset.shared_obs.data,
            iteration: 0,
            env_steps: 0,
            logger: None,
            checkpointer: None,
        })
    }

    pub fn with_logger<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.logger = Some(Box::new(logger));
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn cpo(&self) -> &Cpo<B, P, C, O> {
        &self.cpo
    }

    pub fn envs(&self) -> &V {
        &self.envs
    }

    pub fn storage(&self) -> &RolloutStorage {
        &self.storage
    }

    pub fn tracker(&self) -> &EpisodeTracker {
        &self.tracker
    }

    /// Index of the next learning iteration.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    fn asymmetric(&self) -> bool {
        self.cpo.config().asymmetric
    }

    fn observation_tensors(
        &self,
    ) -> (Tensor<B::InnerBackend, 2>, Option<Tensor<B::InnerBackend, 2>>) {
        let device = self.cpo.device();
        let rows = self.envs.num_rows();
        let spaces = self.envs.spaces();

        let obs = Tensor::from_data(TensorData::new(self.obs.clone(), [rows, spaces.obs_size()]), device);
        let states = self.asymmetric().then(|| {
            Tensor::from_data(
                TensorData::new(self.shared_obs.clone(), [rows, spaces.shared_obs_size()]),
                device,
            )
        });
        (obs, states)
    }

    fn query(&self, models: &(P::InnerModule, C::InnerModule, C::InnerModule), selection: ActionSelection) -> StepQuery {
        let (policy, critic, cost_critic) = models;
        let (obs, states) = self.observation_tensors();

        let dist = policy.forward(obs.clone(), states.clone());
        let actions = selection.select(&dist);
        let log_probs = dist.log_prob(actions.clone());

        StepQuery {
            actions: to_vec(actions),
            log_probs: to_vec(log_probs),
            means: to_vec(dist.mean()),
            stds: to_vec(dist.stddev()),
            values: to_vec(critic.forward(obs.clone(), states.clone())),
            cost_values: to_vec(cost_critic.forward(obs, states)),
        }
    }

    fn refresh_observations(&mut self) -> Result<(), RunnerError> {
        let reset = self.envs.reset()?;
        self.obs = reset.obs.data;
        self.shared_obs = reset.shared_obs.data;
        Ok(())
    }

    /// Fill the storage with one rollout and compute returns and advantages.
    pub fn collect_rollout(&mut self, selection: ActionSelection) -> Result<RolloutSummary, RunnerError> {
        let config = self.cpo.config().clone();
        let models = self.cpo.inference_models();

        self.storage.clear();
        self.tracker.begin_rollout();
        let mut completed = Vec::new();

        for _ in 0..config.num_transitions_per_env {
            if config.apply_reset {
                self.refresh_observations()?;
            }

            let query = self.query(&models, selection);
            let step = self.envs.step(&query.actions)?;

            self.storage.add_transition(&StepRecord {
                observations: &self.obs,
                states: config.asymmetric.then_some(self.shared_obs.as_slice()),
                actions: &query.actions,
                rewards: &step.rewards,
                costs: &step.costs,
                dones: &step.dones,
                values: &query.values,
                cost_values: &query.cost_values,
                log_probs: &query.log_probs,
                means: &query.means,
                stds: &query.stds,
            })?;
            completed.extend(self.tracker.record_step(&step.rewards, &step.costs, &step.dones));

            self.obs = step.obs.data;
            self.shared_obs = step.shared_obs.data;
            self.env_steps += self.envs.num_envs();
        }

        let bootstrap = self.query(&models, selection);
        self.storage
            .compute_returns(&bootstrap.values, config.gamma, config.lam)?;
        self.storage
            .compute_costs(&bootstrap.cost_values, config.gamma, config.lam)?;

        Ok(RolloutSummary {
            completed,
            constraint: self.tracker.constraint_estimate(config.cost_limit),
            statistics: self.storage.get_statistics(),
        })
    }

    /// Run `num_iterations` collect/update cycles, continuing from the
    /// current iteration counter. Returns one snapshot per iteration.
    pub fn learn(&mut self, num_iterations: usize) -> Result<Vec<TrainingSnapshot>, RunnerError> {
        let start = self.iteration;
        let end = start + num_iterations;
        let mut history = Vec::with_capacity(num_iterations);

        for iteration in start..end {
            let collect_start = Instant::now();
            let rollout = self.collect_rollout(ActionSelection::Stochastic)?;
            let collection_secs = collect_start.elapsed().as_secs_f32();

            let violation = rollout.constraint.violation();
            if !rollout.constraint.is_measured() {
                log::debug!("iteration {}: no completed episodes, treating policy as feasible", iteration);
            }

            let learn_start = Instant::now();
            let stats = self.cpo.update(&self.storage, violation)?;
            if !stats.is_finite() {
                return Err(CpoError::NonFinite {
                    quantity: "update statistics",
                }
                .into());
            }
            self.storage.clear();
            let learn_secs = learn_start.elapsed().as_secs_f32();

            let snapshot = self.snapshot(iteration, end, &rollout, violation, &stats, collection_secs, learn_secs);
            if let Some(logger) = self.logger.as_mut() {
                logger.log(&snapshot);
            }
            self.iteration = iteration + 1;

            if self.checkpointer.as_ref().is_some_and(|c| c.should_save(self.iteration)) {
                self.save_checkpoint()?;
            }
            history.push(snapshot);
        }

        let saved_last = self.checkpointer.as_ref().is_some_and(|c| c.should_save(end));
        if num_iterations > 0 && !saved_last {
            self.save_checkpoint()?;
        }
        if let Some(logger) = self.logger.as_mut() {
            logger.flush();
        }
        Ok(history)
    }

    #[allow(clippy::too_many_arguments)]
    fn snapshot(
        &self,
        iteration: usize,
        total: usize,
        rollout: &RolloutSummary,
        violation: f32,
        stats: &CpoUpdateStats,
        collection_secs: f32,
        learn_secs: f32,
    ) -> TrainingSnapshot {
        let dominant_case = stats
            .case_counts
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(case, _)| case as u8)
            .unwrap_or(0);

        TrainingSnapshot {
            iteration,
            total_iterations: total,
            env_steps: self.env_steps,
            iteration_steps: self.storage.num_steps() * self.envs.num_envs(),
            episodes: rollout.completed.len(),
            mean_reward: self.tracker.reward_window().mean(),
            mean_cost: self.tracker.cost_window().mean(),
            mean_length: self.tracker.length_window().mean(),
            violation,
            value_loss: stats.mean_value_loss,
            cost_value_loss: stats.mean_cost_value_loss,
            surrogate: stats.mean_surrogate,
            kl: stats.mean_kl,
            step_size: stats.mean_step,
            case: dominant_case,
            collection_secs,
            learn_secs,
        }
    }

    /// Act deterministically for `num_steps` batch steps without storing
    /// anything, optionally rendering after every step. Returns the episodes
    /// completed meanwhile.
    pub fn play(
        &mut self,
        num_steps: usize,
        render: Option<RenderMode>,
    ) -> Result<Vec<CompletedEpisode>, RunnerError> {
        let models = self.cpo.inference_models();
        let mut tracker = EpisodeTracker::new(self.envs.num_rows());
        let mut completed = Vec::new();

        for _ in 0..num_steps {
            let query = self.query(&models, ActionSelection::Deterministic);
            let step = self.envs.step(&query.actions)?;
            completed.extend(tracker.record_step(&step.rewards, &step.costs, &step.dones));
            self.obs = step.obs.data;
            self.shared_obs = step.shared_obs.data;
            if let Some(mode) = render {
                self.envs.render(mode)?;
            }
        }
        Ok(completed)
    }

    /// Render the environment batch; `RgbArray` frames come back tiled.
    pub fn render(&mut self, mode: RenderMode) -> Result<Option<Frame>, RunnerError> {
        Ok(self.envs.render(mode)?)
    }

    /// Save the policy as `model_{iteration}.bin`, where `iteration` is the
    /// next iteration to run. No-op without a checkpointer.
    pub fn save_checkpoint(&mut self) -> Result<Option<PathBuf>, RunnerError> {
        let metric = self.tracker.reward_window().mean();
        match self.checkpointer.as_mut() {
            Some(checkpointer) => Ok(Some(checkpointer.save(self.cpo.policy(), self.iteration, metric)?)),
            None => Ok(None),
        }
    }

    /// Restore the policy from `path` and resume from its iteration.
    pub fn load_checkpoint(&mut self, path: &Path) -> Result<usize, RunnerError> {
        let template = self.cpo.policy().clone();
        let (policy, iteration) = load_checkpoint(template, path, self.cpo.device())?;
        self.cpo.set_policy(policy);
        self.iteration = iteration;
        println!("Resumed from {} (iteration {})", path.display(), iteration);
        Ok(iteration)
    }

    /// Close the environment batch.
    pub fn close(&mut self) -> Result<(), RunnerError> {
        self.envs.close()?;
        Ok(())
    }
}
