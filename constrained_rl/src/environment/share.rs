//! Shared-observation wrapper for multi-agent tasks.
//!
//! A [`MultiAgentTask`] exposes a global state and per-agent action
//! partitions. [`ShareEnv`] turns it into a [`SafeEnv`] where
//!
//! - agent `i` observes `standardize([state ‖ one_hot(i)])`;
//! - every agent's shared observation is `standardize(state)`;
//! - all actions are available;
//! - an agent is done when it terminated or was truncated.
//!
//! Actions are padded to the widest partition: agent `i` reads the first
//! `partition[i]` entries of its `[n_actions]` slot.

use super::spaces::{EnvSpaces, Space};
use super::{EnvReset, EnvStep, Info, SafeEnv};
use crate::algorithms::gae::standardize;

/// Observation bound advertised for standardized inputs.
pub const OBS_BOUND: f32 = 10.0;

/// Per-agent outcome of one task step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStep {
    pub rewards: Vec<f32>,
    pub costs: Vec<f32>,
    pub terminations: Vec<bool>,
    pub truncations: Vec<bool>,
    pub infos: Vec<Info>,
}

pub trait MultiAgentTask {
    /// Action width of each agent.
    fn action_partitions(&self) -> Vec<usize>;

    fn state(&self) -> Vec<f32>;

    fn reset(&mut self);

    /// `actions[i]` has `action_partitions()[i]` entries.
    fn step(&mut self, actions: &[Vec<f32>]) -> TaskStep;

    fn close(&mut self) {}
}

pub struct ShareEnv<T: MultiAgentTask> {
    task: T,
    partitions: Vec<usize>,
    n_actions: usize,
    state_size: usize,
}

impl<T: MultiAgentTask> ShareEnv<T> {
    pub fn new(task: T) -> Self {
        let partitions = task.action_partitions();
        let n_actions = partitions.iter().copied().max().unwrap_or(0);
        let state_size = task.state().len();
        Self {
            task,
            partitions,
            n_actions,
            state_size,
        }
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    fn observations(&self) -> (Vec<f32>, Vec<f32>) {
        let n = self.partitions.len();
        let state = self.task.state();

        let mut shared_state = state.clone();
        standardize(&mut shared_state);

        let mut obs = Vec::with_capacity(n * (self.state_size + n));
        let mut shared = Vec::with_capacity(n * self.state_size);
        for agent in 0..n {
            let mut row = state.clone();
            row.extend((0..n).map(|j| if j == agent { 1.0 } else { 0.0 }));
            standardize(&mut row);
            obs.extend(row);
            shared.extend_from_slice(&shared_state);
        }
        (obs, shared)
    }

    fn avail_actions(&self) -> Vec<f32> {
        vec![1.0; self.partitions.len() * self.n_actions]
    }
}

impl<T: MultiAgentTask> SafeEnv for ShareEnv<T> {
    fn n_agents(&self) -> usize {
        self.partitions.len()
    }

    fn spaces(&self) -> EnvSpaces {
        let n = self.partitions.len();
        EnvSpaces {
            observation: Space::boxed(-OBS_BOUND, OBS_BOUND, self.state_size + n),
            shared_observation: Space::boxed(-OBS_BOUND, OBS_BOUND, self.state_size),
            action: Space::boxed(-1.0, 1.0, self.n_actions),
        }
    }

    fn reset(&mut self) -> EnvReset {
        self.task.reset();
        let (obs, shared_obs) = self.observations();
        EnvReset {
            obs,
            shared_obs,
            avail_actions: self.avail_actions(),
        }
    }

    fn step(&mut self, actions: &[f32]) -> EnvStep {
        let slot = self.n_actions.max(1);
        let per_agent: Vec<Vec<f32>> = self
            .partitions
            .iter()
            .zip(actions.chunks(slot))
            .map(|(&width, chunk)| chunk[..width.min(chunk.len())].to_vec())
            .collect();

        let outcome = self.task.step(&per_agent);
        let dones = outcome
            .terminations
            .iter()
            .zip(&outcome.truncations)
            .map(|(&term, &trunc)| term || trunc)
            .collect();
        let (obs, shared_obs) = self.observations();

        EnvStep {
            obs,
            shared_obs,
            rewards: outcome.rewards,
            costs: outcome.costs,
            dones,
            infos: outcome.infos,
            avail_actions: self.avail_actions(),
        }
    }

    fn close(&mut self) {
        self.task.close();
    }
}
