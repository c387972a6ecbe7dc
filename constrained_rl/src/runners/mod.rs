//! On-policy training runners.
//!
//! - [`RolloutStorage`]: fixed-horizon buffer of `(step, row)` transitions
//!   with reward and cost GAE
//! - [`CpoRunner`]: collect / update / log / checkpoint loop over a
//!   [`VecEnv`](crate::environment::VecEnv)

pub mod cpo_runner;
pub mod rollout_storage;

#[cfg(test)]
mod tests;

pub use cpo_runner::{CpoRunner, RolloutSummary, RunnerError};
pub use rollout_storage::{
    MinibatchData, RolloutStorage, Sampler, StepRecord, StorageError, StorageStatistics,
};
