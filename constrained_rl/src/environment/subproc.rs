//! Threaded vectorized environment.

use super::messages::{WorkerRequest, WorkerResponse};
use super::render::{tile_frames, Frame, RenderMode};
use super::spaces::EnvSpaces;
use super::worker::{spawn_worker, WorkerHandle};
use super::{check_action_count, AgentBatch, BatchedReset, BatchedStep, EnvError, SafeEnv, VecEnv};

/// One worker thread per environment.
///
/// Calls fan out to all workers before any reply is awaited, so the
/// environments run concurrently. Dropping the batch closes it.
pub struct SubprocVecEnv {
    workers: Vec<WorkerHandle>,
    n_agents: usize,
    spaces: EnvSpaces,
    waiting: bool,
    closed: bool,
}

impl SubprocVecEnv {
    /// Spawn a worker per factory. Agent count and spaces come from worker 0.
    pub fn new<I, F, E>(factories: I) -> Result<Self, EnvError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> E + Send + 'static,
        E: SafeEnv + 'static,
    {
        let mut workers = Vec::new();
        for (index, factory) in factories.into_iter().enumerate() {
            workers.push(spawn_worker(index, factory)?);
        }
        let first = workers.first().ok_or(EnvError::Closed)?;

        let n_agents = match first.call(WorkerRequest::GetNumAgents)? {
            WorkerResponse::NumAgents(n) => n,
            other => return Err(unexpected(0, "get_num_agents", &other)),
        };
        let spaces = match first.call(WorkerRequest::GetSpaces)? {
            WorkerResponse::Spaces(spaces) => spaces,
            other => return Err(unexpected(0, "get_spaces", &other)),
        };

        log::debug!("started {} environment workers ({} agents each)", workers.len(), n_agents);
        Ok(Self {
            workers,
            n_agents,
            spaces,
            waiting: false,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        Ok(())
    }

    /// Send `request` to every worker, then collect every reply in order.
    fn broadcast(&self, request: WorkerRequest) -> Result<Vec<WorkerResponse>, EnvError> {
        for worker in &self.workers {
            worker.send(request.clone())?;
        }
        self.collect()
    }

    fn collect(&self) -> Result<Vec<WorkerResponse>, EnvError> {
        self.workers.iter().map(WorkerHandle::recv).collect()
    }
}

fn unexpected(index: usize, expected: &'static str, actual: &WorkerResponse) -> EnvError {
    EnvError::UnexpectedResponse {
        index,
        expected,
        actual: actual.tag(),
    }
}

impl VecEnv for SubprocVecEnv {
    fn num_envs(&self) -> usize {
        self.workers.len()
    }

    fn n_agents(&self) -> usize {
        self.n_agents
    }

    fn spaces(&self) -> &EnvSpaces {
        &self.spaces
    }

    fn reset(&mut self) -> Result<BatchedReset, EnvError> {
        self.ensure_open()?;
        let resets = self
            .broadcast(WorkerRequest::Reset)?
            .into_iter()
            .enumerate()
            .map(|(i, response)| match response {
                WorkerResponse::Reset(reset) => Ok(reset),
                other => Err(unexpected(i, "reset", &other)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BatchedReset::from_resets(resets, self.n_agents, &self.spaces))
    }

    fn step_async(&mut self, actions: &[f32]) -> Result<(), EnvError> {
        self.ensure_open()?;
        if self.waiting {
            return Err(EnvError::StepPending);
        }
        let action_dim = self.spaces.action_dim();
        check_action_count(actions, self.num_envs(), self.n_agents, action_dim)?;

        let per_env = self.n_agents * action_dim;
        for (worker, chunk) in self.workers.iter().zip(actions.chunks(per_env.max(1))) {
            worker.send(WorkerRequest::Step(chunk.to_vec()))?;
        }
        self.waiting = true;
        Ok(())
    }

    fn step_wait(&mut self) -> Result<BatchedStep, EnvError> {
        self.ensure_open()?;
        if !self.waiting {
            return Err(EnvError::NoStepPending);
        }
        self.waiting = false;

        let steps = self
            .collect()?
            .into_iter()
            .enumerate()
            .map(|(i, response)| match response {
                WorkerResponse::Step(step) => Ok(step),
                other => Err(unexpected(i, "step", &other)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BatchedStep::from_steps(steps, self.n_agents, &self.spaces))
    }

    fn reset_task(&mut self) -> Result<AgentBatch, EnvError> {
        self.ensure_open()?;
        let blocks = self
            .broadcast(WorkerRequest::ResetTask)?
            .into_iter()
            .enumerate()
            .map(|(i, response)| match response {
                WorkerResponse::ResetTask(obs) => Ok(obs),
                other => Err(unexpected(i, "reset_task", &other)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AgentBatch::stack(blocks, self.n_agents, self.spaces.obs_size()))
    }

    fn render(&mut self, mode: RenderMode) -> Result<Option<Frame>, EnvError> {
        self.ensure_open()?;
        let mut frames = Vec::with_capacity(self.workers.len());
        for (i, response) in self.broadcast(WorkerRequest::Render(mode))?.into_iter().enumerate() {
            match response {
                WorkerResponse::Render(Some(frame)) => frames.push(frame),
                WorkerResponse::Render(None) => {}
                other => return Err(unexpected(i, "render", &other)),
            }
        }
        Ok(match mode {
            RenderMode::RgbArray => tile_frames(&frames),
            RenderMode::Human => None,
        })
    }

    /// Drain a pending step, send `Close` to every worker and join them.
    fn close(&mut self) -> Result<(), EnvError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.waiting {
            for worker in &self.workers {
                let _ = worker.recv();
            }
            self.waiting = false;
        }
        for worker in &self.workers {
            let _ = worker.send(WorkerRequest::Close);
        }
        for worker in &mut self.workers {
            if !worker.join() {
                log::error!("env-worker-{} panicked before shutdown", worker.index());
            }
        }
        Ok(())
    }
}

impl Drop for SubprocVecEnv {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
