//! Sequential vectorized environment.

use super::render::{tile_frames, Frame, RenderMode};
use super::spaces::EnvSpaces;
use super::{
    check_action_count, step_with_auto_reset, AgentBatch, BatchedReset, BatchedStep, EnvError,
    SafeEnv, VecEnv,
};

/// Steps every environment in order on the calling thread.
///
/// Same observable behaviour as [`SubprocVecEnv`](super::SubprocVecEnv),
/// without concurrency.
pub struct DummyVecEnv<E: SafeEnv> {
    envs: Vec<E>,
    n_agents: usize,
    spaces: EnvSpaces,
    pending: Option<Vec<f32>>,
    closed: bool,
}

impl<E: SafeEnv> DummyVecEnv<E> {
    /// Build one environment per factory. Agent count and spaces come from
    /// the first.
    pub fn new<I, F>(factories: I) -> Result<Self, EnvError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> E,
    {
        let envs: Vec<E> = factories.into_iter().map(|f| f()).collect();
        let first = envs.first().ok_or(EnvError::Closed)?;
        let n_agents = first.n_agents();
        let spaces = first.spaces();
        Ok(Self {
            envs,
            n_agents,
            spaces,
            pending: None,
            closed: false,
        })
    }

    pub fn envs(&self) -> &[E] {
        &self.envs
    }

    fn ensure_open(&self) -> Result<(), EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        Ok(())
    }
}

impl<E: SafeEnv> VecEnv for DummyVecEnv<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn n_agents(&self) -> usize {
        self.n_agents
    }

    fn spaces(&self) -> &EnvSpaces {
        &self.spaces
    }

    fn reset(&mut self) -> Result<BatchedReset, EnvError> {
        self.ensure_open()?;
        let resets = self.envs.iter_mut().map(|env| env.reset()).collect();
        Ok(BatchedReset::from_resets(resets, self.n_agents, &self.spaces))
    }

    fn step_async(&mut self, actions: &[f32]) -> Result<(), EnvError> {
        self.ensure_open()?;
        if self.pending.is_some() {
            return Err(EnvError::StepPending);
        }
        check_action_count(actions, self.num_envs(), self.n_agents, self.spaces.action_dim())?;
        self.pending = Some(actions.to_vec());
        Ok(())
    }

    fn step_wait(&mut self) -> Result<BatchedStep, EnvError> {
        self.ensure_open()?;
        let actions = self.pending.take().ok_or(EnvError::NoStepPending)?;
        let per_env = (self.n_agents * self.spaces.action_dim()).max(1);

        let steps = self
            .envs
            .iter_mut()
            .zip(actions.chunks(per_env))
            .map(|(env, chunk)| step_with_auto_reset(env, chunk))
            .collect();
        Ok(BatchedStep::from_steps(steps, self.n_agents, &self.spaces))
    }

    fn reset_task(&mut self) -> Result<AgentBatch, EnvError> {
        self.ensure_open()?;
        let blocks = self
            .envs
            .iter_mut()
            .map(|env| env.reset_task())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AgentBatch::stack(blocks, self.n_agents, self.spaces.obs_size()))
    }

    fn render(&mut self, mode: RenderMode) -> Result<Option<Frame>, EnvError> {
        self.ensure_open()?;
        let mut frames = Vec::with_capacity(self.envs.len());
        for env in &mut self.envs {
            if let Some(frame) = env.render(mode)? {
                frames.push(frame);
            }
        }
        Ok(match mode {
            RenderMode::RgbArray => tile_frames(&frames),
            RenderMode::Human => None,
        })
    }

    fn close(&mut self) -> Result<(), EnvError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending = None;
        for env in &mut self.envs {
            env.close();
        }
        Ok(())
    }
}
