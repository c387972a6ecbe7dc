//! Generalized Advantage Estimation for reward and cost signals.
//!
//! CPO estimates two advantages per transition: one on rewards, one on
//! costs. Both use the same recursion and differ only in the signal and
//! the critic supplying the baseline.
//!
//! ## Formula
//!
//! ```text
//! δ_t = x_t + γ V(s_{t+1}) (1 - done_t) - V(s_t)
//! A_t = δ_t + γ λ A_{t+1} (1 - done_t)
//! R_t = A_t + V(s_t)
//! ```
//!
//! where `x_t` is the reward or the cost and `V(s_T)` after the horizon is the
//! bootstrap estimate from the matching critic.
//!
//! ## Layout
//!
//! Rollouts are stored step-major: element `step * num_rows + row`. A row is
//! one (environment, agent) pair.

/// Advantages and their bootstrapped returns, same layout as the inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaeEstimate {
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
}

/// GAE over one row's trajectory.
///
/// `bootstrap` is `V(s_T)` for the observation following the last step.
pub fn compute_gae(
    signal: &[f32],
    values: &[f32],
    dones: &[bool],
    bootstrap: f32,
    gamma: f32,
    lam: f32,
) -> GaeEstimate {
    let horizon = signal.len().min(values.len()).min(dones.len());
    let mut advantages = vec![0.0f32; horizon];
    let mut returns = vec![0.0f32; horizon];

    let mut running = 0.0f32;
    let mut next_value = bootstrap;

    for t in (0..horizon).rev() {
        let continues = if dones[t] { 0.0 } else { 1.0 };
        let delta = signal[t] + gamma * next_value * continues - values[t];
        running = delta + gamma * lam * continues * running;

        advantages[t] = running;
        returns[t] = running + values[t];
        next_value = values[t];
    }

    GaeEstimate { advantages, returns }
}

/// GAE for every row of a step-major rollout.
///
/// The row count is taken from `bootstraps.len()`. Trailing elements that do
/// not fill a whole step are ignored.
pub fn compute_gae_rows(
    signal: &[f32],
    values: &[f32],
    dones: &[bool],
    bootstraps: &[f32],
    gamma: f32,
    lam: f32,
) -> GaeEstimate {
    let num_rows = bootstraps.len();
    if num_rows == 0 {
        return GaeEstimate::default();
    }
    let steps = signal.len().min(values.len()).min(dones.len()) / num_rows;
    let total = steps * num_rows;

    let mut estimate = GaeEstimate {
        advantages: vec![0.0; total],
        returns: vec![0.0; total],
    };

    for (row, &bootstrap) in bootstraps.iter().enumerate() {
        let column = |buf: &[f32]| -> Vec<f32> { (0..steps).map(|t| buf[t * num_rows + row]).collect() };
        let row_dones: Vec<bool> = (0..steps).map(|t| dones[t * num_rows + row]).collect();

        let row_estimate = compute_gae(
            &column(signal),
            &column(values),
            &row_dones,
            bootstrap,
            gamma,
            lam,
        );

        for t in 0..steps {
            estimate.advantages[t * num_rows + row] = row_estimate.advantages[t];
            estimate.returns[t * num_rows + row] = row_estimate.returns[t];
        }
    }

    estimate
}

/// Shift to zero mean and scale to unit (population) standard deviation.
///
/// A single element becomes zero; constant inputs become all zeros.
pub fn standardize(values: &mut [f32]) {
    match values.len() {
        0 => {}
        1 => values[0] = 0.0,
        len => {
            let n = len as f32;
            let mean = values.iter().sum::<f32>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            let std = (variance + 1e-8).sqrt();
            for v in values.iter_mut() {
                *v = (*v - mean) / std;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gae_returns_are_advantage_plus_value() {
        let estimate = compute_gae(&[1.0, 1.0, 1.0], &[0.5, 0.5, 0.5], &[false; 3], 0.5, 0.99, 0.95);

        assert_eq!(estimate.advantages.len(), 3);
        for t in 0..3 {
            assert!(estimate.advantages[t] > 0.0);
            assert!((estimate.returns[t] - (estimate.advantages[t] + 0.5)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_done_blocks_bootstrap() {
        // done at the final step: δ = r - V, the bootstrap is ignored.
        let estimate = compute_gae(&[0.0, 0.0, 1.0], &[0.0, 0.0, 0.25], &[false, false, true], 100.0, 0.99, 0.95);
        assert!((estimate.advantages[2] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_rows_match_single_trajectory() {
        // 2 rows, 3 steps: [r0t0, r1t0, r0t1, r1t1, r0t2, r1t2]
        let signal = [1.0, 0.0, 1.0, 0.0, 1.0, 5.0];
        let values = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let dones = [false, false, false, true, false, false];

        let estimate = compute_gae_rows(&signal, &values, &dones, &[0.7, 0.8], 0.9, 0.8);
        let row1 = compute_gae(&[0.0, 0.0, 5.0], &[0.2, 0.4, 0.6], &[false, true, false], 0.8, 0.9, 0.8);

        for t in 0..3 {
            assert!((estimate.advantages[t * 2 + 1] - row1.advantages[t]).abs() < 1e-6);
            assert!((estimate.returns[t * 2 + 1] - row1.returns[t]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_standardize_moments() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        standardize(&mut values);

        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let std = (values.iter().map(|v| v * v).sum::<f32>() / n).sqrt();
        assert!(mean.abs() < 1e-6);
        assert!((std - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_standardize_degenerate_inputs() {
        let mut empty: Vec<f32> = vec![];
        standardize(&mut empty);
        assert!(empty.is_empty());

        let mut single = vec![5.0];
        standardize(&mut single);
        assert_eq!(single, vec![0.0]);

        let mut constant = vec![3.0; 4];
        standardize(&mut constant);
        assert!(constant.iter().all(|v| v.abs() < 1e-3));
    }

    proptest! {
        #[test]
        fn prop_gae_finite_for_bounded_inputs(
            steps in prop::collection::vec((-10.0f32..10.0, -10.0f32..10.0, any::<bool>()), 1..64),
            bootstrap in -10.0f32..10.0,
            gamma in 0.0f32..=1.0,
            lam in 0.0f32..=1.0,
        ) {
            let signal: Vec<f32> = steps.iter().map(|s| s.0).collect();
            let values: Vec<f32> = steps.iter().map(|s| s.1).collect();
            let dones: Vec<bool> = steps.iter().map(|s| s.2).collect();

            let estimate = compute_gae(&signal, &values, &dones, bootstrap, gamma, lam);
            prop_assert_eq!(estimate.advantages.len(), steps.len());
            prop_assert!(estimate.advantages.iter().all(|a| a.is_finite()));
            prop_assert!(estimate.returns.iter().all(|r| r.is_finite()));
        }
    }
}
