//! Configuration for CPO training.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runners::rollout_storage::Sampler;

/// Configuration validation / loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A count parameter must be positive.
    #[error("{field} must be > 0, got {value}")]
    InvalidCount { field: &'static str, value: usize },
    /// A parameter is outside its valid range.
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// Fewer transitions per rollout than mini-batches.
    #[error("{transitions} transitions cannot be split into {minibatches} mini-batches")]
    InvalidMinibatch {
        transitions: usize,
        minibatches: usize,
    },
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Hyperparameters of the CPO trainer.
///
/// Defaults follow common CPO practice: a small KL trust region, ten CG
/// iterations and a linear line-search grid over `[0, 0.01]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpoConfig {
    // Rollout
    pub num_transitions_per_env: usize,
    pub apply_reset: bool,
    pub asymmetric: bool,

    // Learning schedule
    pub num_learning_epochs: usize,
    pub num_mini_batches: usize,
    pub sampler: Sampler,

    // Advantage estimation
    pub gamma: f32,
    pub lam: f32,

    // Constraint / trust region
    pub cost_limit: f32,
    pub max_kl: f32,
    pub damping: f32,
    pub cg_iterations: usize,
    pub line_search_steps: usize,
    pub max_step_size: f32,

    // Critics
    pub critic_learning_rate: f64,
    pub critic_l2_coef: f32,
    pub max_grad_norm: f32,

    // Logging
    pub log_interval: usize,
}

impl Default for CpoConfig {
    fn default() -> Self {
        Self {
            num_transitions_per_env: 32,
            apply_reset: false,
            asymmetric: false,
            num_learning_epochs: 5,
            num_mini_batches: 4,
            sampler: Sampler::Sequential,
            gamma: 0.998,
            lam: 0.95,
            cost_limit: 25.0,
            max_kl: 0.02,
            damping: 0.1,
            cg_iterations: 10,
            line_search_steps: 10,
            max_step_size: 0.01,
            critic_learning_rate: 1e-3,
            critic_l2_coef: 0.001,
            max_grad_norm: 0.5,
            log_interval: 1,
        }
    }
}

impl CpoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.build()
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Transitions stored per rollout for `num_rows` environment rows.
    pub fn transitions_per_rollout(&self, num_rows: usize) -> usize {
        self.num_transitions_per_env * num_rows
    }

    /// Validate all parameters.
    ///
    /// The mini-batch split depends on the environment batch and is checked
    /// separately by [`CpoConfig::validate_batch`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("num_transitions_per_env", self.num_transitions_per_env),
            ("num_learning_epochs", self.num_learning_epochs),
            ("num_mini_batches", self.num_mini_batches),
            ("cg_iterations", self.cg_iterations),
            ("line_search_steps", self.line_search_steps),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }

        check_range("gamma", self.gamma as f64, 0.0, 1.0)?;
        check_range("lam", self.lam as f64, 0.0, 1.0)?;
        check_range("max_kl", self.max_kl as f64, f64::MIN_POSITIVE, f64::MAX)?;
        check_range("damping", self.damping as f64, 0.0, f64::MAX)?;
        check_range("max_step_size", self.max_step_size as f64, 0.0, f64::MAX)?;
        check_range("critic_learning_rate", self.critic_learning_rate, 0.0, f64::MAX)?;
        check_range("critic_l2_coef", self.critic_l2_coef as f64, 0.0, f64::MAX)?;
        check_range("max_grad_norm", self.max_grad_norm as f64, f64::MIN_POSITIVE, f64::MAX)?;

        Ok(())
    }

    /// Check that a rollout over `num_rows` rows fills every mini-batch.
    pub fn validate_batch(&self, num_rows: usize) -> Result<(), ConfigError> {
        let transitions = self.transitions_per_rollout(num_rows);
        if transitions < self.num_mini_batches {
            return Err(ConfigError::InvalidMinibatch {
                transitions,
                minibatches: self.num_mini_batches,
            });
        }
        Ok(())
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    pub fn with_num_transitions_per_env(mut self, steps: usize) -> Self {
        self.num_transitions_per_env = steps;
        self
    }

    pub fn with_num_learning_epochs(mut self, epochs: usize) -> Self {
        self.num_learning_epochs = epochs;
        self
    }

    pub fn with_num_mini_batches(mut self, n: usize) -> Self {
        self.num_mini_batches = n;
        self
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_lam(mut self, lam: f32) -> Self {
        self.lam = lam;
        self
    }

    pub fn with_cost_limit(mut self, limit: f32) -> Self {
        self.cost_limit = limit;
        self
    }

    pub fn with_max_kl(mut self, max_kl: f32) -> Self {
        self.max_kl = max_kl;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_cg_iterations(mut self, iterations: usize) -> Self {
        self.cg_iterations = iterations;
        self
    }

    /// Line-search grid: `steps` points evenly spaced in `[0, max_step_size]`.
    pub fn with_line_search(mut self, steps: usize, max_step_size: f32) -> Self {
        self.line_search_steps = steps;
        self.max_step_size = max_step_size;
        self
    }

    pub fn with_critic_learning_rate(mut self, lr: f64) -> Self {
        self.critic_learning_rate = lr;
        self
    }

    pub fn with_critic_l2_coef(mut self, coef: f32) -> Self {
        self.critic_l2_coef = coef;
        self
    }

    pub fn with_max_grad_norm(mut self, norm: f32) -> Self {
        self.max_grad_norm = norm;
        self
    }

    /// Store the shared observation as privileged state for the networks.
    pub fn with_asymmetric(mut self, asymmetric: bool) -> Self {
        self.asymmetric = asymmetric;
        self
    }

    /// Reset every environment before each collection step.
    pub fn with_apply_reset(mut self, apply_reset: bool) -> Self {
        self.apply_reset = apply_reset;
        self
    }

    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval;
        self
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CpoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cg_iterations, 10);
        assert_eq!(config.line_search_steps, 10);
        assert!((config.max_kl - 0.02).abs() < 1e-9);
        assert!((config.max_step_size - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_zero_count_rejected() {
        let err = CpoConfig::new().with_num_mini_batches(0).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidCount {
                field: "num_mini_batches",
                ..
            }
        ));
    }

    #[test]
    fn test_gamma_out_of_range() {
        let err = CpoConfig::new().with_gamma(1.5).build().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "gamma", .. }));
    }

    #[test]
    fn test_nan_rejected() {
        let err = CpoConfig::new().with_max_kl(f32::NAN).validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "max_kl", .. }));
    }

    #[test]
    fn test_batch_too_small_for_minibatches() {
        let config = CpoConfig::new()
            .with_num_transitions_per_env(2)
            .with_num_mini_batches(8);
        assert!(config.validate_batch(2).is_err());
        assert!(config.validate_batch(4).is_ok());
    }

    #[test]
    fn test_json_round_trip_and_partial_input() {
        let config = CpoConfig::new().with_cost_limit(10.0).with_sampler(Sampler::Random);
        let text = config.to_json_string().unwrap();
        let parsed: CpoConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, config);

        let partial: CpoConfig = serde_json::from_str(r#"{ "max_kl": 0.05 }"#).unwrap();
        assert!((partial.max_kl - 0.05).abs() < 1e-9);
        assert_eq!(partial.num_mini_batches, 4);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpo.json");
        std::fs::write(&path, r#"{ "gamma": 0.9, "num_learning_epochs": 2 }"#).unwrap();

        let config = CpoConfig::from_json_file(&path).unwrap();
        assert!((config.gamma - 0.9).abs() < 1e-6);
        assert_eq!(config.num_learning_epochs, 2);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            CpoConfig::from_json_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
