//! End-to-end behaviour of [`CpoRunner`] on [`ConstantRewardEnv`] batches.
//!
//! Every environment pays reward 1 per step and ends after `HORIZON` steps,
//! so completed episodes have exactly known statistics.

use burn::backend::{Autodiff, NdArray};
use burn::optim::Optimizer;
use tempfile::tempdir;

use crate::algorithms::cpo::{create_critic_optimizer, Cpo, CpoConfig};
use crate::algorithms::policy::ActionSelection;
use crate::checkpoint::{Checkpointer, CheckpointerConfig};
use crate::core::episode_stats::{ConstraintEstimate, NEUTRAL_VIOLATION};
use crate::core::flat_params::get_flat_params;
use crate::environment::testing::ConstantRewardEnv;
use crate::environment::{DummyVecEnv, SubprocVecEnv, VecEnv};
use crate::nn::mlp::{MlpConfig, MlpCritic, MlpGaussianPolicy};
use crate::runners::cpo_runner::{CpoRunner, RunnerError};

type B = Autodiff<NdArray<f32>>;

const OBS: usize = 3;
const ACT: usize = 2;
const HORIZON: usize = 5;

fn config() -> CpoConfig {
    CpoConfig::new()
        .with_num_transitions_per_env(HORIZON)
        .with_num_learning_epochs(1)
        .with_num_mini_batches(2)
        .with_cost_limit(25.0)
        .with_cg_iterations(5)
}

fn cpo(
    config: CpoConfig,
    obs_size: usize,
) -> Cpo<B, MlpGaussianPolicy<B>, MlpCritic<B>, impl Optimizer<MlpCritic<B>, B>> {
    let device = Default::default();
    let mlp = MlpConfig::new(vec![8]);
    Cpo::new(
        config.clone(),
        mlp.init_policy::<B>(obs_size, ACT, &device),
        mlp.init_critic::<B>(obs_size, &device),
        mlp.init_critic::<B>(obs_size, &device),
        create_critic_optimizer(&config),
        create_critic_optimizer(&config),
        device,
    )
}

fn envs(num_envs: usize, horizon: usize, cost: f32) -> DummyVecEnv<ConstantRewardEnv> {
    DummyVecEnv::new((0..num_envs).map(|_| move || ConstantRewardEnv::new(OBS, ACT, horizon).with_cost(cost)))
        .unwrap()
}

fn runner(
    config: CpoConfig,
    num_envs: usize,
    cost: f32,
) -> CpoRunner<B, MlpGaussianPolicy<B>, MlpCritic<B>, impl Optimizer<MlpCritic<B>, B>, DummyVecEnv<ConstantRewardEnv>>
{
    CpoRunner::new(cpo(config, OBS), envs(num_envs, HORIZON, cost)).unwrap()
}

// ============================================================================
// Rollout collection
// ============================================================================

#[test]
fn test_collect_completes_one_episode_per_env() {
    let mut runner = runner(config(), 2, 0.0);
    let summary = runner.collect_rollout(ActionSelection::Stochastic).unwrap();

    assert_eq!(summary.completed.len(), 2);
    for episode in &summary.completed {
        assert_eq!(episode.length, HORIZON);
        assert_eq!(episode.reward, HORIZON as f32);
        assert_eq!(episode.cost, 0.0);
    }
    assert!(runner.storage().is_full());
    assert_eq!(runner.storage().len(), 2 * HORIZON);
    assert_eq!(runner.env_steps(), 2 * HORIZON);
    assert_eq!(runner.tracker().reward_window().mean(), Some(HORIZON as f32));
}

#[test]
fn test_constraint_measured_from_completed_episodes() {
    // 5 steps at cost 10 is 50 per episode against a limit of 25.
    let mut runner = runner(config(), 2, 10.0);
    let summary = runner.collect_rollout(ActionSelection::Stochastic).unwrap();

    match summary.constraint {
        ConstraintEstimate::Measured { mean_cost, violation } => {
            assert!((mean_cost - 50.0).abs() < 1e-4);
            assert!((violation - 25.0).abs() < 1e-4);
        }
        other => panic!("expected a measured constraint, got {:?}", other),
    }
    assert!((summary.statistics.mean_cost - 10.0).abs() < 1e-5);
}

#[test]
fn test_no_completed_episode_is_treated_as_feasible() {
    let mut runner = CpoRunner::new(cpo(config(), OBS), envs(2, 4 * HORIZON, 100.0)).unwrap();
    let summary = runner.collect_rollout(ActionSelection::Stochastic).unwrap();

    assert!(summary.completed.is_empty());
    assert!(!summary.constraint.is_measured());
    assert_eq!(summary.constraint.violation(), NEUTRAL_VIOLATION);
}

#[test]
fn test_constraint_only_counts_current_rollout() {
    let mut runner = CpoRunner::new(cpo(config(), OBS), envs(1, 2 * HORIZON, 1.0)).unwrap();

    // First rollout ends mid-episode, the second completes it.
    let first = runner.collect_rollout(ActionSelection::Stochastic).unwrap();
    let second = runner.collect_rollout(ActionSelection::Stochastic).unwrap();
    let third = runner.collect_rollout(ActionSelection::Stochastic).unwrap();

    assert!(!first.constraint.is_measured());
    assert_eq!(second.completed.len(), 1);
    assert_eq!(second.completed[0].length, 2 * HORIZON);
    assert!(!third.constraint.is_measured());
}

// ============================================================================
// Learning loop
// ============================================================================

#[test]
fn test_learn_produces_finite_snapshots() {
    let mut runner = runner(config(), 2, 1.0);
    let history = runner.learn(2).unwrap();

    assert_eq!(history.len(), 2);
    assert_eq!(runner.iteration(), 2);
    for (i, snapshot) in history.iter().enumerate() {
        assert_eq!(snapshot.iteration, i);
        assert_eq!(snapshot.total_iterations, 2);
        assert_eq!(snapshot.episodes, 2);
        assert_eq!(snapshot.mean_reward, Some(HORIZON as f32));
        assert!(snapshot.value_loss.is_finite());
        assert!(snapshot.cost_value_loss.is_finite());
        assert!(snapshot.kl.is_finite());
        assert!(snapshot.case <= 4);
    }
    assert!(runner.storage().is_empty());
}

#[test]
fn test_snapshots_count_env_steps_cumulatively() {
    let mut runner = runner(config(), 2, 0.0);
    let history = runner.learn(3).unwrap();

    let per_iteration = 2 * HORIZON;
    for (i, snapshot) in history.iter().enumerate() {
        assert_eq!(snapshot.iteration_steps, per_iteration);
        assert_eq!(snapshot.env_steps, (i + 1) * per_iteration);
    }
    assert_eq!(runner.env_steps(), 3 * per_iteration);
}

#[test]
fn test_learn_with_threaded_envs() {
    let factories = (0..2).map(|_| move || ConstantRewardEnv::new(OBS, ACT, HORIZON));
    let envs = SubprocVecEnv::new(factories).unwrap();
    let mut runner = CpoRunner::new(cpo(config(), OBS), envs).unwrap();

    let history = runner.learn(1).unwrap();
    assert_eq!(history[0].episodes, 2);
    runner.close().unwrap();
}

#[test]
fn test_asymmetric_critics_read_shared_observations() {
    let config = config().with_asymmetric(true);
    let mut runner = runner(config, 2, 0.0);
    assert_eq!(runner.storage().state_size(), Some(OBS));
    assert!(runner.learn(1).is_ok());
}

#[test]
fn test_play_stores_nothing() {
    let mut runner = runner(config(), 2, 0.0);
    let episodes = runner.play(HORIZON, None).unwrap();

    assert_eq!(episodes.len(), 2);
    assert!(runner.storage().is_empty());
    assert_eq!(runner.env_steps(), 0);
}

#[test]
fn test_model_shape_mismatch_is_rejected() {
    let result = CpoRunner::new(cpo(config(), OBS + 1), envs(2, HORIZON, 0.0));
    assert!(matches!(
        result,
        Err(RunnerError::ShapeMismatch {
            what: "observation features",
            ..
        })
    ));
}

#[test]
fn test_too_many_minibatches_is_rejected() {
    let config = config().with_num_transitions_per_env(1).with_num_mini_batches(4);
    assert!(matches!(
        CpoRunner::new(cpo(config, OBS), envs(2, HORIZON, 0.0)),
        Err(RunnerError::Config(_))
    ));
}

// ============================================================================
// Checkpoints
// ============================================================================

#[test]
fn test_resume_restores_policy_and_iteration() {
    let dir = tempdir().unwrap();
    let checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path()).with_save_interval(1)).unwrap();
    let mut trained = runner(config(), 2, 0.0).with_checkpointer(checkpointer);
    trained.learn(2).unwrap();

    let path = dir.path().join("model_2.bin");
    assert!(path.exists());
    assert!(dir.path().join("model_1.bin").exists());
    assert!(!dir.path().join("model_0.bin").exists());

    let mut resumed = runner(config(), 2, 0.0);
    assert_eq!(resumed.load_checkpoint(&path).unwrap(), 2);
    assert_eq!(resumed.iteration(), 2);

    let expected: Vec<f32> = get_flat_params(trained.cpo().policy()).unwrap().into_data().iter::<f32>().collect();
    let actual: Vec<f32> = get_flat_params(resumed.cpo().policy()).unwrap().into_data().iter::<f32>().collect();
    assert_eq!(actual, expected);

    // Iteration numbering continues from the checkpoint.
    let history = resumed.learn(1).unwrap();
    assert_eq!(history[0].iteration, 2);
    assert_eq!(resumed.iteration(), 3);
}

#[test]
fn test_rows_follow_env_count() {
    let runner = runner(config(), 3, 0.0);
    assert_eq!(runner.envs().num_rows(), 3);
    assert_eq!(runner.storage().num_rows(), 3);
}
