//! Controller ↔ worker protocol.
//!
//! Every request except [`WorkerRequest::Close`] is answered by exactly one
//! response. A worker that cannot serve a request answers
//! [`WorkerResponse::Fault`] and terminates.

use super::render::{Frame, RenderMode};
use super::spaces::EnvSpaces;
use super::{EnvReset, EnvStep};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    /// `[agent][action_dim]` actions.
    Step(Vec<f32>),
    Reset,
    ResetTask,
    Render(RenderMode),
    GetSpaces,
    GetNumAgents,
    /// Release the environment and exit. No reply.
    Close,
}

impl WorkerRequest {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Reset => "reset",
            Self::ResetTask => "reset_task",
            Self::Render(_) => "render",
            Self::GetSpaces => "get_spaces",
            Self::GetNumAgents => "get_num_agents",
            Self::Close => "close",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    /// Auto-reset already applied.
    Step(EnvStep),
    Reset(EnvReset),
    ResetTask(Vec<f32>),
    /// A frame for `RgbArray`, `None` for `Human`.
    Render(Option<Frame>),
    Spaces(EnvSpaces),
    NumAgents(usize),
    /// The request could not be served; the worker has stopped.
    Fault(String),
}

impl WorkerResponse {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Reset(_) => "reset",
            Self::ResetTask(_) => "reset_task",
            Self::Render(_) => "render",
            Self::Spaces(_) => "get_spaces",
            Self::NumAgents(_) => "get_num_agents",
            Self::Fault(_) => "fault",
        }
    }
}
