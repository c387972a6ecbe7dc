//! Deterministic stub environments for tests and smoke runs.

use super::render::{Frame, RenderMode};
use super::spaces::{EnvSpaces, Space};
use super::{EnvReset, EnvStep, Info, SafeEnv};

/// Single-agent environment paying reward 1 and cost `cost` every step,
/// done after `horizon` steps.
///
/// Observations are `[t, t, ...]` with `t` the step index inside the
/// episode, so a fresh episode observes zeros.
#[derive(Debug, Clone)]
pub struct ConstantRewardEnv {
    obs_size: usize,
    action_dim: usize,
    horizon: usize,
    cost: f32,
    t: usize,
    episodes: usize,
    frame: Option<Frame>,
}

impl ConstantRewardEnv {
    pub fn new(obs_size: usize, action_dim: usize, horizon: usize) -> Self {
        Self {
            obs_size,
            action_dim,
            horizon,
            cost: 0.0,
            t: 0,
            episodes: 0,
            frame: None,
        }
    }

    /// Per-step cost.
    pub fn with_cost(mut self, cost: f32) -> Self {
        self.cost = cost;
        self
    }

    /// Enable `render`, returning `frame` for `RgbArray`.
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Episodes started so far, including the current one.
    pub fn episodes(&self) -> usize {
        self.episodes
    }

    fn observation(&self) -> Vec<f32> {
        vec![self.t as f32; self.obs_size]
    }
}

impl SafeEnv for ConstantRewardEnv {
    fn n_agents(&self) -> usize {
        1
    }

    fn spaces(&self) -> EnvSpaces {
        EnvSpaces {
            observation: Space::boxed(0.0, self.horizon as f32, self.obs_size),
            shared_observation: Space::boxed(0.0, self.horizon as f32, self.obs_size),
            action: Space::boxed(-1.0, 1.0, self.action_dim),
        }
    }

    fn reset(&mut self) -> EnvReset {
        self.t = 0;
        self.episodes += 1;
        EnvReset {
            obs: self.observation(),
            shared_obs: self.observation(),
            avail_actions: vec![1.0; self.action_dim],
        }
    }

    fn step(&mut self, _actions: &[f32]) -> EnvStep {
        self.t += 1;
        let done = self.t >= self.horizon;
        let mut info = Info::new();
        info.insert("cost".to_string(), self.cost);
        EnvStep {
            obs: self.observation(),
            shared_obs: self.observation(),
            rewards: vec![1.0],
            costs: vec![self.cost],
            dones: vec![done],
            infos: vec![info],
            avail_actions: vec![1.0; self.action_dim],
        }
    }

    fn render(&mut self, mode: RenderMode) -> Result<Option<Frame>, super::EnvError> {
        match (&self.frame, mode) {
            (None, _) => Err(super::EnvError::NotImplemented("render")),
            (Some(_), RenderMode::Human) => Ok(None),
            (Some(frame), RenderMode::RgbArray) => Ok(Some(frame.clone())),
        }
    }
}

/// Multi-agent environment whose agents finish at different steps.
///
/// Agent `i` reports done once `t >= done_at[i]`. Every agent observes `[t]`.
#[derive(Debug, Clone)]
pub struct StaggeredDoneEnv {
    done_at: Vec<usize>,
    t: usize,
}

impl StaggeredDoneEnv {
    pub fn new(done_at: Vec<usize>) -> Self {
        Self { done_at, t: 0 }
    }

    fn observation(&self) -> Vec<f32> {
        vec![self.t as f32; self.done_at.len()]
    }
}

impl SafeEnv for StaggeredDoneEnv {
    fn n_agents(&self) -> usize {
        self.done_at.len()
    }

    fn spaces(&self) -> EnvSpaces {
        let horizon = self.done_at.iter().copied().max().unwrap_or(0) as f32;
        EnvSpaces {
            observation: Space::boxed(0.0, horizon, 1),
            shared_observation: Space::boxed(0.0, horizon, 1),
            action: Space::boxed(-1.0, 1.0, 1),
        }
    }

    fn reset(&mut self) -> EnvReset {
        self.t = 0;
        EnvReset {
            obs: self.observation(),
            shared_obs: self.observation(),
            avail_actions: vec![1.0; self.done_at.len()],
        }
    }

    fn step(&mut self, _actions: &[f32]) -> EnvStep {
        self.t += 1;
        let n = self.done_at.len();
        EnvStep {
            obs: self.observation(),
            shared_obs: self.observation(),
            rewards: vec![1.0; n],
            costs: vec![0.0; n],
            dones: self.done_at.iter().map(|&at| self.t >= at).collect(),
            infos: vec![Info::new(); n],
            avail_actions: vec![1.0; n],
        }
    }
}
