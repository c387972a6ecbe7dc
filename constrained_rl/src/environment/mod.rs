//! Vectorized safe environments.
//!
//! A [`SafeEnv`] is one (possibly multi-agent) environment instance that
//! returns a cost signal next to the reward. A [`VecEnv`] presents a batch
//! of them behind a synchronous interface:
//!
//! ```text
//!              step_async(actions)               step_wait()
//!  controller ─────────────────────► worker 0 ─────────────────► controller
//!             ─────────────────────► worker 1 ─────────────────►
//!             ─────────────────────► worker N ─────────────────►
//!                      (dispatch, non-blocking)    (collect, blocking)
//! ```
//!
//! - [`SubprocVecEnv`]: one worker thread per environment, request/response
//!   over a dedicated channel pair.
//! - [`DummyVecEnv`]: the same interface, stepping environments in order on
//!   the calling thread.
//!
//! Both apply [`step_with_auto_reset`]: when every agent of an environment is
//! done, the environment is reset before the step result is returned, so the
//! observation in that result is the first observation of the next episode.
//!
//! # Layout
//!
//! Batched per-agent data is flat and row-major over `[env][agent][dim]`.
//! A *row* is one `(env, agent)` pair.

pub mod dummy;
pub mod messages;
pub mod render;
pub mod share;
pub mod spaces;
pub mod subproc;
pub mod testing;
pub mod worker;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use thiserror::Error;

pub use dummy::DummyVecEnv;
pub use messages::{WorkerRequest, WorkerResponse};
pub use render::{tile_frames, Frame, RenderMode};
pub use share::{MultiAgentTask, ShareEnv, TaskStep};
pub use spaces::{EnvSpaces, Space};
pub use subproc::SubprocVecEnv;

/// Auxiliary per-agent step information.
pub type Info = BTreeMap<String, f32>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("worker {index} disconnected")]
    WorkerDisconnected { index: usize },
    #[error("worker {index} failed: {message}")]
    WorkerFault { index: usize, message: String },
    #[error("worker {index} answered `{actual}` to a `{expected}` request")]
    UnexpectedResponse {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("step_async called while a step is already pending")]
    StepPending,
    #[error("step_wait called without a pending step")]
    NoStepPending,
    #[error("expected {expected} action values, got {actual}")]
    ActionCount { expected: usize, actual: usize },
    #[error("failed to spawn worker {index}: {message}")]
    Spawn { index: usize, message: String },
    #[error("`{0}` is not implemented by this environment")]
    NotImplemented(&'static str),
    #[error("environment batch is closed")]
    Closed,
}

// ============================================================================
// Single environment
// ============================================================================

/// Result of resetting one environment. Per-agent vectors are `[agent][dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvReset {
    pub obs: Vec<f32>,
    pub shared_obs: Vec<f32>,
    pub avail_actions: Vec<f32>,
}

/// Result of stepping one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvStep {
    pub obs: Vec<f32>,
    pub shared_obs: Vec<f32>,
    /// `[agent]`
    pub rewards: Vec<f32>,
    /// `[agent]`
    pub costs: Vec<f32>,
    /// `[agent]`, terminated or truncated.
    pub dones: Vec<bool>,
    pub infos: Vec<Info>,
    pub avail_actions: Vec<f32>,
}

impl EnvStep {
    /// Every agent is done (a single-agent env: its one flag is set).
    pub fn all_done(&self) -> bool {
        !self.dones.is_empty() && self.dones.iter().all(|&d| d)
    }
}

/// One environment instance with a reward and a cost channel.
pub trait SafeEnv {
    fn n_agents(&self) -> usize;

    fn spaces(&self) -> EnvSpaces;

    fn reset(&mut self) -> EnvReset;

    /// Advance one step. `actions` is `[agent][action_dim]`.
    fn step(&mut self, actions: &[f32]) -> EnvStep;

    /// Reset to a new task; returns the task-reset observation.
    fn reset_task(&mut self) -> Result<Vec<f32>, EnvError> {
        Err(EnvError::NotImplemented("reset_task"))
    }

    /// An RGB frame for [`RenderMode::RgbArray`]; `None` for human display.
    fn render(&mut self, _mode: RenderMode) -> Result<Option<Frame>, EnvError> {
        Err(EnvError::NotImplemented("render"))
    }

    fn close(&mut self) {}
}

/// Step `env` and reset it in place when all its agents are done.
///
/// Rewards, costs, dones and infos are those of the terminal transition; the
/// observations and available actions come from the fresh episode.
pub fn step_with_auto_reset<E: SafeEnv + ?Sized>(env: &mut E, actions: &[f32]) -> EnvStep {
    let mut step = env.step(actions);
    if step.all_done() {
        let reset = env.reset();
        step.obs = reset.obs;
        step.shared_obs = reset.shared_obs;
        step.avail_actions = reset.avail_actions;
    }
    step
}

// ============================================================================
// Batched results
// ============================================================================

/// Per-agent data of a whole batch, `[env][agent][dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentBatch {
    pub data: Vec<f32>,
    pub num_envs: usize,
    pub n_agents: usize,
    pub dim: usize,
}

impl AgentBatch {
    /// Concatenate per-environment `[agent][dim]` blocks.
    pub fn stack<I>(blocks: I, n_agents: usize, dim: usize) -> Self
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        let mut data = Vec::new();
        let mut num_envs = 0;
        for block in blocks {
            data.extend(block);
            num_envs += 1;
        }
        Self {
            data,
            num_envs,
            n_agents,
            dim,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_envs * self.n_agents
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }

    pub fn env(&self, env: usize) -> &[f32] {
        let width = self.n_agents * self.dim;
        &self.data[env * width..(env + 1) * width]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchedReset {
    pub obs: AgentBatch,
    pub shared_obs: AgentBatch,
    pub avail_actions: AgentBatch,
}

impl BatchedReset {
    pub fn from_resets(resets: Vec<EnvReset>, n_agents: usize, spaces: &EnvSpaces) -> Self {
        let mut obs = Vec::with_capacity(resets.len());
        let mut shared = Vec::with_capacity(resets.len());
        let mut avail = Vec::with_capacity(resets.len());
        for r in resets {
            obs.push(r.obs);
            shared.push(r.shared_obs);
            avail.push(r.avail_actions);
        }
        Self {
            obs: AgentBatch::stack(obs, n_agents, spaces.obs_size()),
            shared_obs: AgentBatch::stack(shared, n_agents, spaces.shared_obs_size()),
            avail_actions: AgentBatch::stack(avail, n_agents, spaces.action_dim()),
        }
    }
}

/// Step results of a whole batch. Scalar per-agent fields are `[env][agent]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchedStep {
    pub obs: AgentBatch,
    pub shared_obs: AgentBatch,
    pub rewards: Vec<f32>,
    pub costs: Vec<f32>,
    pub dones: Vec<bool>,
    /// `[env][agent]`
    pub infos: Vec<Vec<Info>>,
    pub avail_actions: AgentBatch,
}

impl BatchedStep {
    pub fn from_steps(steps: Vec<EnvStep>, n_agents: usize, spaces: &EnvSpaces) -> Self {
        let mut obs = Vec::with_capacity(steps.len());
        let mut shared = Vec::with_capacity(steps.len());
        let mut avail = Vec::with_capacity(steps.len());
        let mut rewards = Vec::new();
        let mut costs = Vec::new();
        let mut dones = Vec::new();
        let mut infos = Vec::with_capacity(steps.len());

        for s in steps {
            obs.push(s.obs);
            shared.push(s.shared_obs);
            avail.push(s.avail_actions);
            rewards.extend(s.rewards);
            costs.extend(s.costs);
            dones.extend(s.dones);
            infos.push(s.infos);
        }

        Self {
            obs: AgentBatch::stack(obs, n_agents, spaces.obs_size()),
            shared_obs: AgentBatch::stack(shared, n_agents, spaces.shared_obs_size()),
            rewards,
            costs,
            dones,
            infos,
            avail_actions: AgentBatch::stack(avail, n_agents, spaces.action_dim()),
        }
    }
}

// ============================================================================
// Vectorized interface
// ============================================================================

/// A batch of environments stepped together.
///
/// At most one step may be outstanding: `step_async` must be followed by
/// `step_wait` before the next dispatch.
pub trait VecEnv {
    fn num_envs(&self) -> usize;

    fn n_agents(&self) -> usize;

    fn spaces(&self) -> &EnvSpaces;

    /// `(env, agent)` rows per step.
    fn num_rows(&self) -> usize {
        self.num_envs() * self.n_agents()
    }

    fn reset(&mut self) -> Result<BatchedReset, EnvError>;

    /// Dispatch `[env][agent][action_dim]` actions without waiting.
    fn step_async(&mut self, actions: &[f32]) -> Result<(), EnvError>;

    /// Collect the results of the pending step.
    fn step_wait(&mut self) -> Result<BatchedStep, EnvError>;

    fn step(&mut self, actions: &[f32]) -> Result<BatchedStep, EnvError> {
        self.step_async(actions)?;
        self.step_wait()
    }

    /// Task-reset observations, `[env][agent][obs]`.
    fn reset_task(&mut self) -> Result<AgentBatch, EnvError>;

    /// A tiled frame of all environments for [`RenderMode::RgbArray`].
    fn render(&mut self, mode: RenderMode) -> Result<Option<Frame>, EnvError>;

    /// Release every environment. Further calls fail with [`EnvError::Closed`].
    fn close(&mut self) -> Result<(), EnvError>;
}

/// Check a flat action batch against the batch geometry.
pub(crate) fn check_action_count(
    actions: &[f32],
    num_envs: usize,
    n_agents: usize,
    action_dim: usize,
) -> Result<(), EnvError> {
    let expected = num_envs * n_agents * action_dim;
    if actions.len() != expected {
        return Err(EnvError::ActionCount {
            expected,
            actual: actions.len(),
        });
    }
    Ok(())
}
