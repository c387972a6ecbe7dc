//! Batch-level behaviour shared by both vectorized environments.

use super::testing::{ConstantRewardEnv, StaggeredDoneEnv};
use super::*;

const HORIZON: usize = 3;

fn factories(n: usize) -> Vec<impl FnOnce() -> ConstantRewardEnv + Send + 'static> {
    (0..n)
        .map(|i| move || ConstantRewardEnv::new(2, 1, HORIZON).with_cost(i as f32))
        .collect()
}

fn run_episode<V: VecEnv>(envs: &mut V) -> Vec<BatchedStep> {
    let actions = vec![0.0; envs.num_rows() * envs.spaces().action_dim()];
    (0..HORIZON).map(|_| envs.step(&actions).unwrap()).collect()
}

#[test]
fn test_auto_reset_returns_fresh_observation() {
    let mut envs = SubprocVecEnv::new(factories(2)).unwrap();
    let initial = envs.reset().unwrap();
    let steps = run_episode(&mut envs);

    let terminal = steps.last().unwrap();
    assert_eq!(terminal.dones, vec![true, true]);
    assert_eq!(terminal.rewards, vec![1.0, 1.0]);
    // Terminal-step observations already belong to the next episode.
    assert_eq!(terminal.obs, initial.obs);
    assert_eq!(terminal.shared_obs, initial.shared_obs);

    let mid = &steps[0];
    assert_eq!(mid.dones, vec![false, false]);
    assert_eq!(mid.obs.row(0), &[1.0, 1.0]);
}

fn check_partial_done_does_not_reset<V: VecEnv>(envs: &mut V) {
    let actions = vec![0.0; envs.num_rows()];
    envs.reset().unwrap();

    // Agent 0 is done after one step, agent 1 is still running.
    let partial = envs.step(&actions).unwrap();
    assert_eq!(partial.dones, vec![true, false]);
    assert_eq!(partial.obs.data, vec![1.0, 1.0]);
    assert_eq!(partial.shared_obs.data, vec![1.0, 1.0]);

    // Both agents done: the returned observation is the reset one.
    let full = envs.step(&actions).unwrap();
    assert_eq!(full.dones, vec![true, true]);
    assert_eq!(full.obs.data, vec![0.0, 0.0]);
    assert_eq!(full.shared_obs.data, vec![0.0, 0.0]);
}

#[test]
fn test_auto_reset_waits_for_every_agent() {
    let make = || vec![|| StaggeredDoneEnv::new(vec![1, 2])];
    let mut sequential = DummyVecEnv::new(make()).unwrap();
    check_partial_done_does_not_reset(&mut sequential);

    let mut threaded = SubprocVecEnv::new(make()).unwrap();
    assert_eq!(threaded.n_agents(), 2);
    check_partial_done_does_not_reset(&mut threaded);
    threaded.close().unwrap();
}

#[test]
fn test_subproc_matches_dummy() {
    let mut threaded = SubprocVecEnv::new(factories(3)).unwrap();
    let mut sequential = DummyVecEnv::new(factories(3)).unwrap();

    assert_eq!(threaded.num_envs(), sequential.num_envs());
    assert_eq!(threaded.spaces(), sequential.spaces());
    assert_eq!(threaded.reset().unwrap(), sequential.reset().unwrap());

    for _ in 0..2 {
        assert_eq!(run_episode(&mut threaded), run_episode(&mut sequential));
    }
}

#[test]
fn test_costs_are_per_env() {
    let mut envs = DummyVecEnv::new(factories(3)).unwrap();
    envs.reset().unwrap();
    let step = envs.step(&[0.0; 3]).unwrap();
    assert_eq!(step.costs, vec![0.0, 1.0, 2.0]);
    assert_eq!(step.infos[2][0].get("cost"), Some(&2.0));
}

#[test]
fn test_single_outstanding_step() {
    let mut envs = SubprocVecEnv::new(factories(2)).unwrap();
    envs.reset().unwrap();

    assert_eq!(envs.step_wait().unwrap_err(), EnvError::NoStepPending);
    envs.step_async(&[0.0, 0.0]).unwrap();
    assert_eq!(envs.step_async(&[0.0, 0.0]).unwrap_err(), EnvError::StepPending);
    envs.step_wait().unwrap();
}

#[test]
fn test_action_count_is_checked() {
    let mut envs = DummyVecEnv::new(factories(2)).unwrap();
    let err = envs.step_async(&[0.0; 3]).unwrap_err();
    assert_eq!(err, EnvError::ActionCount { expected: 2, actual: 3 });
}

#[test]
fn test_close_drains_pending_step() {
    let mut envs = SubprocVecEnv::new(factories(2)).unwrap();
    envs.reset().unwrap();
    envs.step_async(&[0.0, 0.0]).unwrap();

    envs.close().unwrap();
    envs.close().unwrap();
    assert_eq!(envs.reset().unwrap_err(), EnvError::Closed);
}

#[test]
fn test_render_tiles_worker_frames() {
    let make = |shade: u8| move || ConstantRewardEnv::new(1, 1, HORIZON).with_frame(Frame::filled(2, 2, [shade; 3]));
    let mut envs = SubprocVecEnv::new(vec![make(10), make(20), make(30)]).unwrap();

    let frame = envs.render(RenderMode::RgbArray).unwrap().unwrap();
    assert_eq!((frame.width, frame.height), (4, 4));
    assert_eq!(frame.pixel(0, 0), [10; 3]);
    assert_eq!(frame.pixel(2, 0), [20; 3]);
    assert_eq!(frame.pixel(0, 2), [30; 3]);
    assert_eq!(frame.pixel(3, 3), [0; 3]);

    assert_eq!(envs.render(RenderMode::Human).unwrap(), None);
}

#[test]
fn test_unsupported_capability_is_a_worker_fault() {
    let mut envs = SubprocVecEnv::new(factories(2)).unwrap();
    let err = envs.reset_task().unwrap_err();
    assert!(matches!(err, EnvError::WorkerFault { index: 0, .. }));

    let mut sequential = DummyVecEnv::new(factories(2)).unwrap();
    assert_eq!(
        sequential.reset_task().unwrap_err(),
        EnvError::NotImplemented("reset_task")
    );
}
