//! Rollout storage for constrained on-policy training.
//!
//! Holds one horizon of transitions for every environment row, then serves
//! GAE targets for both the reward and the cost critic and mini-batches for
//! the CPO update.
//!
//! # Layout
//!
//! Every per-transition buffer is step-major: transition `(step, row)` lives
//! at index `step * num_rows + row`, and vector-valued fields (observations,
//! actions, means, stds) store `dim` contiguous values per transition.
//!
//! ```text
//! step 0: [row 0][row 1] ... [row R-1]
//! step 1: [row 0][row 1] ... [row R-1]
//! ...
//! ```
//!
//! A row is one (environment, agent) pair. Mini-batch indices address the
//! flattened `[step * num_rows + row]` space.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algorithms::gae::{compute_gae_rows, standardize};

/// Storage misuse. These indicate a wiring bug, not a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("rollout storage is full ({capacity} steps)")]
    Overflow { capacity: usize },
    #[error("{field} has {actual} elements, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("cannot split {transitions} transitions into {mini_batches} mini-batches")]
    InvalidMinibatch {
        transitions: usize,
        mini_batches: usize,
    },
    #[error("{0} requested before it was computed")]
    NotComputed(&'static str),
}

/// Order in which transitions are assigned to mini-batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sampler {
    /// Contiguous index ranges in storage order.
    #[default]
    Sequential,
    /// A fresh random permutation per call.
    Random,
}

/// One environment step for all rows, borrowed from the rollout loop.
#[derive(Debug, Clone, Copy)]
pub struct StepRecord<'a> {
    /// `[rows * obs_size]`
    pub observations: &'a [f32],
    /// `[rows * state_size]`, only for asymmetric training.
    pub states: Option<&'a [f32]>,
    /// `[rows * action_dim]`
    pub actions: &'a [f32],
    pub rewards: &'a [f32],
    pub costs: &'a [f32],
    pub dones: &'a [bool],
    pub values: &'a [f32],
    pub cost_values: &'a [f32],
    pub log_probs: &'a [f32],
    /// Behaviour-policy mean `[rows * action_dim]`.
    pub means: &'a [f32],
    /// Behaviour-policy standard deviation `[rows * action_dim]`.
    pub stds: &'a [f32],
}

/// Summary of the stored rollout.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StorageStatistics {
    /// Mean trajectory length, treating the horizon end as a trajectory end.
    pub mean_trajectory_length: f32,
    pub mean_reward: f32,
    pub mean_cost: f32,
}

/// Fixed-horizon transition buffer.
#[derive(Debug, Clone)]
pub struct RolloutStorage {
    num_rows: usize,
    num_steps: usize,
    obs_size: usize,
    state_size: Option<usize>,
    action_dim: usize,
    step: usize,

    observations: Vec<f32>,
    states: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    costs: Vec<f32>,
    dones: Vec<bool>,
    values: Vec<f32>,
    cost_values: Vec<f32>,
    log_probs: Vec<f32>,
    means: Vec<f32>,
    stds: Vec<f32>,

    returns: Vec<f32>,
    advantages: Vec<f32>,
    cost_returns: Vec<f32>,
    cost_advantages: Vec<f32>,
}

fn check_len(field: &'static str, actual: usize, expected: usize) -> Result<(), StorageError> {
    if actual != expected {
        return Err(StorageError::LengthMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

impl RolloutStorage {
    /// Storage for `num_steps` steps of `num_rows` rows.
    ///
    /// `state_size` is `Some` when privileged states are recorded.
    pub fn new(
        num_rows: usize,
        num_steps: usize,
        obs_size: usize,
        state_size: Option<usize>,
        action_dim: usize,
    ) -> Self {
        let capacity = num_rows * num_steps;
        Self {
            num_rows,
            num_steps,
            obs_size,
            state_size,
            action_dim,
            step: 0,
            observations: Vec::with_capacity(capacity * obs_size),
            states: Vec::with_capacity(capacity * state_size.unwrap_or(0)),
            actions: Vec::with_capacity(capacity * action_dim),
            rewards: Vec::with_capacity(capacity),
            costs: Vec::with_capacity(capacity),
            dones: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            cost_values: Vec::with_capacity(capacity),
            log_probs: Vec::with_capacity(capacity),
            means: Vec::with_capacity(capacity * action_dim),
            stds: Vec::with_capacity(capacity * action_dim),
            returns: Vec::new(),
            advantages: Vec::new(),
            cost_returns: Vec::new(),
            cost_advantages: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Steps recorded so far.
    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn obs_size(&self) -> usize {
        self.obs_size
    }

    pub fn state_size(&self) -> Option<usize> {
        self.state_size
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Number of stored transitions.
    pub fn len(&self) -> usize {
        self.step * self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.step == 0
    }

    pub fn is_full(&self) -> bool {
        self.step >= self.num_steps
    }

    /// Append one step for every row.
    pub fn add_transition(&mut self, record: &StepRecord<'_>) -> Result<(), StorageError> {
        if self.is_full() {
            return Err(StorageError::Overflow {
                capacity: self.num_steps,
            });
        }

        let rows = self.num_rows;
        check_len("observations", record.observations.len(), rows * self.obs_size)?;
        check_len("actions", record.actions.len(), rows * self.action_dim)?;
        check_len("rewards", record.rewards.len(), rows)?;
        check_len("costs", record.costs.len(), rows)?;
        check_len("dones", record.dones.len(), rows)?;
        check_len("values", record.values.len(), rows)?;
        check_len("cost_values", record.cost_values.len(), rows)?;
        check_len("log_probs", record.log_probs.len(), rows)?;
        check_len("means", record.means.len(), rows * self.action_dim)?;
        check_len("stds", record.stds.len(), rows * self.action_dim)?;
        match (self.state_size, record.states) {
            (Some(size), Some(states)) => check_len("states", states.len(), rows * size)?,
            (Some(size), None) => check_len("states", 0, rows * size)?,
            (None, _) => {}
        }

        self.observations.extend_from_slice(record.observations);
        if let (Some(_), Some(states)) = (self.state_size, record.states) {
            self.states.extend_from_slice(states);
        }
        self.actions.extend_from_slice(record.actions);
        self.rewards.extend_from_slice(record.rewards);
        self.costs.extend_from_slice(record.costs);
        self.dones.extend_from_slice(record.dones);
        self.values.extend_from_slice(record.values);
        self.cost_values.extend_from_slice(record.cost_values);
        self.log_probs.extend_from_slice(record.log_probs);
        self.means.extend_from_slice(record.means);
        self.stds.extend_from_slice(record.stds);

        self.step += 1;
        Ok(())
    }

    /// Reward returns and standardised advantages.
    ///
    /// `last_values` is the reward critic on the observation after the final
    /// step, one per row.
    pub fn compute_returns(
        &mut self,
        last_values: &[f32],
        gamma: f32,
        lam: f32,
    ) -> Result<(), StorageError> {
        check_len("last_values", last_values.len(), self.num_rows)?;
        let mut estimate = compute_gae_rows(&self.rewards, &self.values, &self.dones, last_values, gamma, lam);
        standardize(&mut estimate.advantages);
        self.advantages = estimate.advantages;
        self.returns = estimate.returns;
        Ok(())
    }

    /// Cost returns and standardised cost advantages.
    pub fn compute_costs(
        &mut self,
        last_cost_values: &[f32],
        gamma: f32,
        lam: f32,
    ) -> Result<(), StorageError> {
        check_len("last_cost_values", last_cost_values.len(), self.num_rows)?;
        let mut estimate = compute_gae_rows(
            &self.costs,
            &self.cost_values,
            &self.dones,
            last_cost_values,
            gamma,
            lam,
        );
        standardize(&mut estimate.advantages);
        self.cost_advantages = estimate.advantages;
        self.cost_returns = estimate.returns;
        Ok(())
    }

    /// Split the stored transitions into `num_mini_batches` disjoint index sets.
    ///
    /// Each set has `len / num_mini_batches` indices; the remainder is dropped.
    pub fn mini_batch_generator(
        &self,
        num_mini_batches: usize,
        sampler: Sampler,
    ) -> Result<Vec<Vec<usize>>, StorageError> {
        let transitions = self.len();
        if num_mini_batches == 0 || transitions < num_mini_batches {
            return Err(StorageError::InvalidMinibatch {
                transitions,
                mini_batches: num_mini_batches,
            });
        }
        let mini_batch_size = transitions / num_mini_batches;

        let mut order: Vec<usize> = (0..transitions).collect();
        if sampler == Sampler::Random {
            order.shuffle(&mut thread_rng());
        }

        Ok(order
            .chunks_exact(mini_batch_size)
            .take(num_mini_batches)
            .map(|chunk| chunk.to_vec())
            .collect())
    }

    /// Gather the fields of the given transitions.
    pub fn minibatch(&self, indices: &[usize]) -> Result<MinibatchData, StorageError> {
        let transitions = self.len();
        if self.advantages.len() != transitions {
            return Err(StorageError::NotComputed("reward advantages"));
        }
        if self.cost_advantages.len() != transitions {
            return Err(StorageError::NotComputed("cost advantages"));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= transitions) {
            return Err(StorageError::LengthMismatch {
                field: "mini-batch index",
                expected: transitions,
                actual: bad,
            });
        }

        let batch = indices.len();
        let a = self.action_dim;
        let mut data = MinibatchData {
            obs_size: self.obs_size,
            state_size: self.state_size,
            action_dim: a,
            observations: Vec::with_capacity(batch * self.obs_size),
            states: self.state_size.map(|s| Vec::with_capacity(batch * s)),
            actions: Vec::with_capacity(batch * a),
            values: Vec::with_capacity(batch),
            cost_values: Vec::with_capacity(batch),
            returns: Vec::with_capacity(batch),
            cost_returns: Vec::with_capacity(batch),
            advantages: Vec::with_capacity(batch),
            cost_advantages: Vec::with_capacity(batch),
            old_log_probs: Vec::with_capacity(batch),
            old_means: Vec::with_capacity(batch * a),
            old_stds: Vec::with_capacity(batch * a),
        };

        for &idx in indices {
            let obs = idx * self.obs_size;
            data.observations
                .extend_from_slice(&self.observations[obs..obs + self.obs_size]);
            if let (Some(size), Some(states)) = (self.state_size, data.states.as_mut()) {
                states.extend_from_slice(&self.states[idx * size..(idx + 1) * size]);
            }
            data.actions.extend_from_slice(&self.actions[idx * a..(idx + 1) * a]);
            data.old_means.extend_from_slice(&self.means[idx * a..(idx + 1) * a]);
            data.old_stds.extend_from_slice(&self.stds[idx * a..(idx + 1) * a]);
            data.values.push(self.values[idx]);
            data.cost_values.push(self.cost_values[idx]);
            data.returns.push(self.returns[idx]);
            data.cost_returns.push(self.cost_returns[idx]);
            data.advantages.push(self.advantages[idx]);
            data.cost_advantages.push(self.cost_advantages[idx]);
            data.old_log_probs.push(self.log_probs[idx]);
        }

        Ok(data)
    }

    /// Mean trajectory length, mean per-step reward and mean per-step cost.
    pub fn get_statistics(&self) -> StorageStatistics {
        if self.is_empty() || self.num_rows == 0 {
            return StorageStatistics::default();
        }

        let steps = self.step;
        let mut lengths = Vec::new();
        for row in 0..self.num_rows {
            let mut current = 0usize;
            for t in 0..steps {
                current += 1;
                if self.dones[t * self.num_rows + row] || t + 1 == steps {
                    lengths.push(current as f32);
                    current = 0;
                }
            }
        }

        let n = self.len() as f32;
        StorageStatistics {
            mean_trajectory_length: lengths.iter().sum::<f32>() / lengths.len().max(1) as f32,
            mean_reward: self.rewards.iter().sum::<f32>() / n,
            mean_cost: self.costs.iter().sum::<f32>() / n,
        }
    }

    /// Invalidate the contents for the next rollout.
    pub fn clear(&mut self) {
        self.step = 0;
        self.observations.clear();
        self.states.clear();
        self.actions.clear();
        self.rewards.clear();
        self.costs.clear();
        self.dones.clear();
        self.values.clear();
        self.cost_values.clear();
        self.log_probs.clear();
        self.means.clear();
        self.stds.clear();
        self.returns.clear();
        self.advantages.clear();
        self.cost_returns.clear();
        self.cost_advantages.clear();
    }

    /// Rewards, step-major.
    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    /// Costs, step-major.
    pub fn costs(&self) -> &[f32] {
        &self.costs
    }

    pub fn dones(&self) -> &[bool] {
        &self.dones
    }

    pub fn advantages(&self) -> &[f32] {
        &self.advantages
    }

    pub fn cost_advantages(&self) -> &[f32] {
        &self.cost_advantages
    }
}

// ============================================================================
// Mini-batch data
// ============================================================================

/// Host-side copy of one mini-batch.
#[derive(Debug, Clone)]
pub struct MinibatchData {
    pub obs_size: usize,
    pub state_size: Option<usize>,
    pub action_dim: usize,
    pub observations: Vec<f32>,
    pub states: Option<Vec<f32>>,
    pub actions: Vec<f32>,
    pub values: Vec<f32>,
    pub cost_values: Vec<f32>,
    pub returns: Vec<f32>,
    pub cost_returns: Vec<f32>,
    pub advantages: Vec<f32>,
    pub cost_advantages: Vec<f32>,
    pub old_log_probs: Vec<f32>,
    pub old_means: Vec<f32>,
    pub old_stds: Vec<f32>,
}

impl MinibatchData {
    pub fn batch_size(&self) -> usize {
        self.returns.len()
    }

    /// `[batch, obs_size]`
    pub fn observations_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let n = self.batch_size();
        Tensor::<B, 1>::from_floats(&self.observations[..], device).reshape([n, self.obs_size])
    }

    /// `[batch, state_size]` when privileged states were recorded.
    pub fn states_tensor<B: Backend>(&self, device: &B::Device) -> Option<Tensor<B, 2>> {
        let n = self.batch_size();
        match (&self.states, self.state_size) {
            (Some(states), Some(size)) => {
                Some(Tensor::<B, 1>::from_floats(&states[..], device).reshape([n, size]))
            }
            _ => None,
        }
    }

    /// `[batch, action_dim]`
    pub fn actions_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        self.per_action(&self.actions, device)
    }

    /// Behaviour-policy means `[batch, action_dim]`.
    pub fn old_means_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        self.per_action(&self.old_means, device)
    }

    /// Behaviour-policy standard deviations `[batch, action_dim]`.
    pub fn old_stds_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        self.per_action(&self.old_stds, device)
    }

    pub fn returns_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(&self.returns[..], device)
    }

    pub fn cost_returns_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(&self.cost_returns[..], device)
    }

    pub fn advantages_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(&self.advantages[..], device)
    }

    pub fn cost_advantages_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(&self.cost_advantages[..], device)
    }

    pub fn old_log_probs_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(&self.old_log_probs[..], device)
    }

    fn per_action<B: Backend>(&self, values: &[f32], device: &B::Device) -> Tensor<B, 2> {
        let n = self.batch_size();
        Tensor::<B, 1>::from_floats(values, device).reshape([n, self.action_dim])
    }
}
