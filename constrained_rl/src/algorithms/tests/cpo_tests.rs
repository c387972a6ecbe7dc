//! CPO update behaviour.
//!
//! Synthetic rollouts are generated from the policy itself, with rewards and
//! costs tied to the sampled actions so both surrogates have a non-zero
//! gradient. The dual-step properties are checked in a quadratic model with
//! `H = I`, where `v = g` and `w = b`.

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::{ElementConversion, Tensor, TensorData};
use proptest::prelude::*;

use crate::algorithms::cpo::line_search::importance_surrogates;
use crate::algorithms::cpo::{create_critic_optimizer, solve_dual, Cpo, CpoConfig, DualInputs, OptimCase};
use crate::algorithms::policy::{ActionSelection, PolicyInference};
use crate::core::flat_params::get_flat_params;
use crate::nn::mlp::{MlpConfig, MlpCritic, MlpGaussianPolicy};
use crate::runners::rollout_storage::{RolloutStorage, StepRecord};

type B = Autodiff<NdArray<f32>>;
type Inner = NdArray<f32>;

const OBS: usize = 3;
const ACT: usize = 2;
const ROWS: usize = 4;
const STEPS: usize = 8;

fn to_vec<const D: usize>(t: Tensor<Inner, D>) -> Vec<f32> {
    t.into_data().iter::<f32>().collect()
}

/// Roll the policy forward on scattered observations; `shift` selects a
/// different observation sequence. Reward follows the second action
/// component, cost the first.
fn synthetic_rollout(policy: &MlpGaussianPolicy<Inner>, shift: usize) -> RolloutStorage {
    let device = Default::default();
    let mut storage = RolloutStorage::new(ROWS, STEPS, OBS, None, ACT);

    for t in 0..STEPS {
        let obs: Vec<f32> = (0..ROWS * OBS).map(|i| ((i + t * 7 + shift * 5) % 11) as f32 / 11.0 - 0.5).collect();
        let obs_tensor = Tensor::<Inner, 2>::from_data(TensorData::new(obs.clone(), [ROWS, OBS]), &device);
        let dist = policy.forward(obs_tensor, None);
        let actions = ActionSelection::Stochastic.select(&dist);
        let log_probs = to_vec(dist.log_prob(actions.clone()));
        let actions = to_vec(actions);

        let rewards: Vec<f32> = actions.chunks(ACT).map(|a| a[1]).collect();
        let costs: Vec<f32> = actions.chunks(ACT).map(|a| a[0].max(0.0)).collect();
        let dones = vec![t + 1 == STEPS; ROWS];

        storage
            .add_transition(&StepRecord {
                observations: &obs,
                states: None,
                actions: &actions,
                rewards: &rewards,
                costs: &costs,
                dones: &dones,
                values: &[0.0; ROWS],
                cost_values: &[0.0; ROWS],
                log_probs: &log_probs,
                means: &to_vec(dist.mean()),
                stds: &to_vec(dist.stddev()),
            })
            .unwrap();
    }

    storage.compute_returns(&[0.0; ROWS], 0.99, 0.95).unwrap();
    storage.compute_costs(&[0.0; ROWS], 0.99, 0.95).unwrap();
    storage
}

/// Importance-weighted cost surrogate of `policy` over the whole rollout.
fn cost_surrogate(policy: &MlpGaussianPolicy<Inner>, storage: &RolloutStorage) -> f32 {
    let device = Default::default();
    let indices: Vec<usize> = (0..storage.len()).collect();
    let data = storage.minibatch(&indices).unwrap();
    let dist = policy.forward(data.observations_tensor(&device), None);
    let (_, cost) = importance_surrogates(
        dist.log_prob(data.actions_tensor(&device)),
        data.old_log_probs_tensor(&device),
        data.advantages_tensor(&device),
        data.cost_advantages_tensor(&device),
    );
    cost.into_scalar().elem::<f32>()
}

fn trainer(config: CpoConfig) -> Cpo<B, MlpGaussianPolicy<B>, MlpCritic<B>, impl Optimizer<MlpCritic<B>, B>> {
    let device = Default::default();
    let mlp = MlpConfig::new(vec![8]);
    Cpo::new(
        config.clone(),
        mlp.init_policy::<B>(OBS, ACT, &device),
        mlp.init_critic::<B>(OBS, &device),
        mlp.init_critic::<B>(OBS, &device),
        create_critic_optimizer(&config),
        create_critic_optimizer(&config),
        device,
    )
}

fn single_step_config() -> CpoConfig {
    CpoConfig::new()
        .with_num_transitions_per_env(STEPS)
        .with_num_learning_epochs(1)
        .with_num_mini_batches(1)
}

// ============================================================================
// Full update
// ============================================================================

#[test]
fn test_update_reports_finite_statistics() {
    let config = CpoConfig::new()
        .with_num_transitions_per_env(STEPS)
        .with_num_learning_epochs(2)
        .with_num_mini_batches(4);
    let mut cpo = trainer(config);
    let storage = synthetic_rollout(&cpo.policy().valid(), 0);

    let stats = cpo.update(&storage, -1.0).unwrap();

    assert!(stats.is_finite());
    assert_eq!(stats.num_updates, 8);
    assert_eq!(stats.case_counts.iter().sum::<usize>(), 8);
    assert!(stats.mean_value_loss >= 0.0);
    assert!(stats.mean_cost_value_loss >= 0.0);
    assert!(stats.mean_kl <= 0.02 + 1e-6);
}

#[test]
fn test_update_moves_critics() {
    let mut cpo = trainer(single_step_config());
    let storage = synthetic_rollout(&cpo.policy().valid(), 0);
    let before = get_flat_params(cpo.critic()).unwrap();

    cpo.update(&storage, -1.0).unwrap();

    let after = get_flat_params(cpo.critic()).unwrap();
    let moved = (after - before).abs().sum().into_scalar().elem::<f32>();
    assert!(moved > 0.0);
}

#[test]
fn test_infeasible_update_does_not_raise_cost() {
    // Fresh networks and a different batch on every trial.
    for trial in 0..5 {
        let mut cpo = trainer(single_step_config());
        let storage = synthetic_rollout(&cpo.policy().valid(), trial);
        let before = cost_surrogate(&cpo.policy().valid(), &storage);

        let stats = cpo.update(&storage, 10.0).unwrap();

        assert_eq!(stats.case_counts[0] + stats.case_counts[1], stats.num_updates);
        let after = cost_surrogate(&cpo.policy().valid(), &storage);
        assert!(
            after - before <= 1e-4,
            "trial {}: cost surrogate rose from {} to {}",
            trial,
            before,
            after
        );
    }
}

#[test]
fn test_feasible_update_respects_cost_slack() {
    let violation = -0.05;
    let mut cpo = trainer(single_step_config());
    let storage = synthetic_rollout(&cpo.policy().valid(), 0);
    let before = cost_surrogate(&cpo.policy().valid(), &storage);

    let stats = cpo.update(&storage, violation).unwrap();

    assert_eq!(stats.case_counts[0] + stats.case_counts[1], 0);
    let after = cost_surrogate(&cpo.policy().valid(), &storage);
    assert!(after - before <= -violation + 1e-4);
}

#[test]
fn test_update_requires_enough_transitions() {
    let config = single_step_config().with_num_mini_batches(ROWS * STEPS + 1);
    let mut cpo = trainer(config);
    let storage = synthetic_rollout(&cpo.policy().valid(), 0);
    assert!(cpo.update(&storage, 0.0).is_err());
}

// ============================================================================
// Dual step in a quadratic model
// ============================================================================

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn vector() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0f64..1.0, 3).prop_filter("non-vanishing", |v| dot(v, v) > 0.01)
}

proptest! {
    /// With `H = I` the step `d = -x` changes the linearised cost by `bᵀd`.
    /// Feasible cases stay inside the slack `-c`; recovery cases never
    /// increase cost.
    #[test]
    fn prop_dual_step_respects_linearised_constraint(
        g in vector(),
        b in vector(),
        c in -1.0f64..1.0,
        max_kl in 0.001f64..0.05,
    ) {
        let dual = solve_dual(&DualInputs {
            q: dot(&g, &g),
            r: dot(&g, &b),
            s: dot(&b, &b),
            c,
            cost_grad_sq_norm: dot(&b, &b),
            max_kl,
        });
        prop_assert!(dual.is_finite());
        prop_assume!(dual.case == OptimCase::InfeasibleRecovery || dual.lam > 1e-3);

        let device = Default::default();
        let to_tensor = |v: &[f64]| {
            let data: Vec<f32> = v.iter().map(|x| *x as f32).collect();
            Tensor::<Inner, 1>::from_data(TensorData::new(data, [v.len()]), &device)
        };
        let x: Vec<f64> = to_vec(dual.search_direction(&to_tensor(&g), Some(&to_tensor(&b))))
            .into_iter()
            .map(f64::from)
            .collect();

        let cost_change = -dot(&b, &x);
        let tolerance = 1e-4 * (1.0 + dot(&x, &x).sqrt());

        if dual.case.starts_feasible() {
            prop_assert!(cost_change <= (-c).max(0.0) + tolerance, "{}: {} > {}", dual.case, cost_change, -c);
        } else {
            prop_assert!(cost_change <= tolerance, "{}: cost rises by {}", dual.case, cost_change);
        }
    }

    /// Both multipliers are non-negative in every regime.
    #[test]
    fn prop_multipliers_non_negative(
        q in 0.0f64..10.0,
        r in -5.0f64..5.0,
        s in 0.01f64..10.0,
        c in -2.0f64..2.0,
    ) {
        let dual = solve_dual(&DualInputs { q, r, s, c, cost_grad_sq_norm: 1.0, max_kl: 0.01 });
        prop_assert!(dual.lam >= 0.0);
        prop_assert!(dual.nu >= 0.0);
    }
}
