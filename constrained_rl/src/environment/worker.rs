//! Environment worker threads.
//!
//! Each worker owns one environment, built inside the thread from a factory,
//! and serves [`WorkerRequest`]s one at a time. Both channels have capacity
//! one: with a single outstanding request per worker the controller never
//! blocks on send.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use super::messages::{WorkerRequest, WorkerResponse};
use super::{step_with_auto_reset, EnvError, SafeEnv};

/// Controller side of one worker.
pub struct WorkerHandle {
    index: usize,
    requests: Sender<WorkerRequest>,
    responses: Receiver<WorkerResponse>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Dispatch a request without waiting for the reply.
    pub fn send(&self, request: WorkerRequest) -> Result<(), EnvError> {
        self.requests
            .send(request)
            .map_err(|_| EnvError::WorkerDisconnected { index: self.index })
    }

    /// Block until the worker replies. A `Fault` reply becomes an error.
    pub fn recv(&self) -> Result<WorkerResponse, EnvError> {
        match self.responses.recv() {
            Ok(WorkerResponse::Fault(message)) => Err(EnvError::WorkerFault {
                index: self.index,
                message,
            }),
            Ok(response) => Ok(response),
            Err(_) => Err(EnvError::WorkerDisconnected { index: self.index }),
        }
    }

    /// Send and wait.
    pub fn call(&self, request: WorkerRequest) -> Result<WorkerResponse, EnvError> {
        self.send(request)?;
        self.recv()
    }

    /// Wait for the thread to exit. Returns `false` if it panicked.
    pub fn join(&mut self) -> bool {
        match self.thread.take() {
            Some(thread) => thread.join().is_ok(),
            None => true,
        }
    }
}

/// Start a worker thread named `env-worker-{index}`.
pub fn spawn_worker<F, E>(index: usize, make_env: F) -> Result<WorkerHandle, EnvError>
where
    F: FnOnce() -> E + Send + 'static,
    E: SafeEnv + 'static,
{
    let (request_tx, request_rx) = crossbeam_channel::bounded(1);
    let (response_tx, response_rx) = crossbeam_channel::bounded(1);

    let thread = std::thread::Builder::new()
        .name(format!("env-worker-{}", index))
        .spawn(move || {
            let env = make_env();
            serve(index, env, request_rx, response_tx);
        })
        .map_err(|e| EnvError::Spawn {
            index,
            message: e.to_string(),
        })?;

    Ok(WorkerHandle {
        index,
        requests: request_tx,
        responses: response_rx,
        thread: Some(thread),
    })
}

/// Request loop. Returns on `Close`, on a fault, or when the controller hangs up.
fn serve<E: SafeEnv>(
    index: usize,
    mut env: E,
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
) {
    while let Ok(request) = requests.recv() {
        let response = match request {
            WorkerRequest::Step(actions) => WorkerResponse::Step(step_with_auto_reset(&mut env, &actions)),
            WorkerRequest::Reset => WorkerResponse::Reset(env.reset()),
            WorkerRequest::ResetTask => match env.reset_task() {
                Ok(obs) => WorkerResponse::ResetTask(obs),
                Err(e) => WorkerResponse::Fault(e.to_string()),
            },
            WorkerRequest::Render(mode) => match env.render(mode) {
                Ok(frame) => WorkerResponse::Render(frame),
                Err(e) => WorkerResponse::Fault(e.to_string()),
            },
            WorkerRequest::GetSpaces => WorkerResponse::Spaces(env.spaces()),
            WorkerRequest::GetNumAgents => WorkerResponse::NumAgents(env.n_agents()),
            WorkerRequest::Close => break,
        };

        let fault = matches!(response, WorkerResponse::Fault(_));
        if fault {
            log::error!("env-worker-{}: {:?}", index, response);
        }
        if responses.send(response).is_err() || fault {
            break;
        }
    }
    env.close();
}
