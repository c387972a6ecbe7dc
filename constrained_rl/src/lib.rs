//! # constrained_rl: Constrained Policy Optimization on burn
//!
//! Safe reinforcement learning with a trust-region policy update that keeps
//! an expected episode cost below a limit.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          CpoRunner                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Thread 1          Thread 2          Thread N                       │
//! │  ┌────────┐        ┌────────┐        ┌────────┐                     │
//! │  │Worker 0│        │Worker 1│        │Worker N│                     │
//! │  │SafeEnv │        │SafeEnv │        │SafeEnv │                     │
//! │  └───┬────┘        └───┬────┘        └───┬────┘                     │
//! │      └─────────────────┼─────────────────┘                          │
//! │                        ▼   (request / response channels)            │
//! │              ┌─────────────────┐      ┌──────────────┐              │
//! │              │ SubprocVecEnv   │─────►│RolloutStorage│              │
//! │              └─────────────────┘      └──────┬───────┘              │
//! │                                              ▼                      │
//! │   ┌────────────────────────────────────────────────────────────┐    │
//! │   │ Cpo: critics ─► g, b ─► CG(Fisher) ─► dual ─► line search  │    │
//! │   └────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use constrained_rl::{create_critic_optimizer, Cpo, CpoConfig, CpoRunner, MlpConfig, SubprocVecEnv};
//!
//! let config = CpoConfig::new().with_cost_limit(25.0);
//! let mlp = MlpConfig::default();
//! let cpo = Cpo::new(
//!     config.clone(),
//!     mlp.init_policy::<B>(obs_size, action_dim, &device),
//!     mlp.init_critic::<B>(obs_size, &device),
//!     mlp.init_critic::<B>(obs_size, &device),
//!     create_critic_optimizer(&config),
//!     create_critic_optimizer(&config),
//!     device,
//! );
//! let envs = SubprocVecEnv::new((0..8).map(|_| || MyEnv::new()))?;
//! let mut runner = CpoRunner::new(cpo, envs)?.with_logger(ConsoleLogger::new(1));
//! runner.learn(500)?;
//! ```

pub mod algorithms;
pub mod checkpoint;
pub mod core;
pub mod environment;
pub mod metrics;
pub mod nn;
pub mod runners;

// Trust-region building blocks
pub use crate::core::flat_params::{flat_grad, get_flat_params, set_params, FlatParamsError};
pub use crate::core::episode_stats::{CompletedEpisode, ConstraintEstimate, EpisodeTracker};
pub use algorithms::conjugate_gradient::{conjugate_gradient, LinearOperator};
pub use algorithms::fisher::FisherVectorProduct;
pub use algorithms::gaussian::PolicyOutputDistribution;
pub use algorithms::policy::{ActionSelection, Critic, CriticInference, Policy, PolicyInference};

// CPO
pub use algorithms::cpo::{
    create_critic_optimizer, solve_dual, ConfigError, Cpo, CpoConfig, CpoError, CpoUpdateStats, OptimCase,
};

// Training loop
pub use runners::{CpoRunner, RolloutStorage, RunnerError, Sampler};

// Environments
pub use environment::{
    DummyVecEnv, EnvError, EnvSpaces, MultiAgentTask, SafeEnv, ShareEnv, Space, SubprocVecEnv, VecEnv,
};

// Networks
pub use nn::mlp::{MlpConfig, MlpCritic, MlpGaussianPolicy};

// Logging and checkpoints
pub use metrics::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, TrainingSnapshot};
pub use checkpoint::{CheckpointError, Checkpointer, CheckpointerConfig};
