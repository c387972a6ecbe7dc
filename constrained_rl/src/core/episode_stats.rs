//! Episode bookkeeping for the rollout loop.
//!
//! Every environment row accumulates a running reward, cost and length.
//! When the row reports `done`, the sums move into bounded rolling windows
//! (oldest evicted first) and the row restarts from zero.
//!
//! The costs of episodes completed during the *current* rollout also feed the
//! constraint estimate `c = mean_cost − cost_limit` consumed by the
//! trust-region update.

use std::collections::VecDeque;

/// Default capacity of the rolling statistics windows.
pub const EPISODE_WINDOW: usize = 100;

/// Neutral constraint violation used when no episode finished in a rollout.
///
/// Slightly negative so the update treats the policy as feasible.
pub const NEUTRAL_VIOLATION: f32 = -1e-8;

// ============================================================================
// RollingWindow
// ============================================================================

/// Fixed-capacity FIFO of scalar episode statistics.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f32>,
    capacity: usize,
}

impl RollingWindow {
    /// Create an empty window. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, evicting the oldest one when full.
    pub fn push(&mut self, value: f32) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn extend<I: IntoIterator<Item = f32>>(&mut self, values: I) {
        for value in values {
            self.push(value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean of the stored values, `None` if empty.
    pub fn mean(&self) -> Option<f32> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f32>() / self.values.len() as f32)
        }
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.values.iter()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

// ============================================================================
// ConstraintEstimate
// ============================================================================

/// Constraint state computed once per rollout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintEstimate {
    /// At least one episode completed during the rollout.
    Measured {
        /// Mean cost over the completed episodes.
        mean_cost: f32,
        /// `mean_cost − cost_limit`; positive means infeasible.
        violation: f32,
    },
    /// No episode completed, so there is no fresh cost measurement.
    NoCompletedEpisodes,
}

impl ConstraintEstimate {
    /// The `c` fed to the dual optimizer.
    pub fn violation(&self) -> f32 {
        match self {
            Self::Measured { violation, .. } => *violation,
            Self::NoCompletedEpisodes => NEUTRAL_VIOLATION,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, Self::Measured { .. })
    }
}

// ============================================================================
// EpisodeTracker
// ============================================================================

/// Summary of one completed episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletedEpisode {
    pub row: usize,
    pub reward: f32,
    pub cost: f32,
    pub length: usize,
}

/// Per-row running sums plus rolling windows of completed episodes.
#[derive(Debug, Clone)]
pub struct EpisodeTracker {
    running_reward: Vec<f32>,
    running_cost: Vec<f32>,
    running_length: Vec<usize>,
    rewards: RollingWindow,
    costs: RollingWindow,
    lengths: RollingWindow,
    rollout_costs: Vec<f32>,
}

impl EpisodeTracker {
    /// Tracker for `num_rows` rows with windows of `EPISODE_WINDOW`.
    pub fn new(num_rows: usize) -> Self {
        Self::with_capacity(num_rows, EPISODE_WINDOW)
    }

    pub fn with_capacity(num_rows: usize, capacity: usize) -> Self {
        Self {
            running_reward: vec![0.0; num_rows],
            running_cost: vec![0.0; num_rows],
            running_length: vec![0; num_rows],
            rewards: RollingWindow::new(capacity),
            costs: RollingWindow::new(capacity),
            lengths: RollingWindow::new(capacity),
            rollout_costs: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.running_reward.len()
    }

    /// Forget the episodes counted toward the previous constraint estimate.
    pub fn begin_rollout(&mut self) {
        self.rollout_costs.clear();
    }

    /// Accumulate one environment step for every row.
    ///
    /// Rows flagged `done` are moved into the windows and reset. Slices
    /// shorter than the row count only update the leading rows.
    pub fn record_step(
        &mut self,
        rewards: &[f32],
        costs: &[f32],
        dones: &[bool],
    ) -> Vec<CompletedEpisode> {
        let mut completed = Vec::new();
        let rows = self
            .num_rows()
            .min(rewards.len())
            .min(costs.len())
            .min(dones.len());

        for row in 0..rows {
            self.running_reward[row] += rewards[row];
            self.running_cost[row] += costs[row];
            self.running_length[row] += 1;

            if dones[row] {
                let episode = CompletedEpisode {
                    row,
                    reward: self.running_reward[row],
                    cost: self.running_cost[row],
                    length: self.running_length[row],
                };
                self.push_completed(&episode);
                completed.push(episode);

                self.running_reward[row] = 0.0;
                self.running_cost[row] = 0.0;
                self.running_length[row] = 0;
            }
        }

        completed
    }

    fn push_completed(&mut self, episode: &CompletedEpisode) {
        self.rewards.push(episode.reward);
        self.costs.push(episode.cost);
        self.lengths.push(episode.length as f32);
        self.rollout_costs.push(episode.cost);
    }

    /// Constraint state from episodes completed since `begin_rollout`.
    pub fn constraint_estimate(&self, cost_limit: f32) -> ConstraintEstimate {
        if self.rollout_costs.is_empty() {
            return ConstraintEstimate::NoCompletedEpisodes;
        }
        let mean_cost = self.rollout_costs.iter().sum::<f32>() / self.rollout_costs.len() as f32;
        ConstraintEstimate::Measured {
            mean_cost,
            violation: mean_cost - cost_limit,
        }
    }

    /// Number of episodes completed since `begin_rollout`.
    pub fn completed_this_rollout(&self) -> usize {
        self.rollout_costs.len()
    }

    pub fn reward_window(&self) -> &RollingWindow {
        &self.rewards
    }

    pub fn cost_window(&self) -> &RollingWindow {
        &self.costs
    }

    pub fn length_window(&self) -> &RollingWindow {
        &self.lengths
    }

    /// Running (unfinished) reward sum of a row.
    pub fn running_reward(&self, row: usize) -> Option<f32> {
        self.running_reward.get(row).copied()
    }
}
