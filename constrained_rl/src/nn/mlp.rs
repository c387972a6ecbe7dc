//! Default feed-forward actor and critic.
//!
//! Both are ELU multilayer perceptrons with orthogonal initialization. The
//! policy has a state-independent learnable log standard deviation,
//! initialized to `ln(init_noise_std)`.

use burn::module::{Module, Param};
use burn::nn::Linear;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::init::{orthogonal_linear, HIDDEN_GAIN, POLICY_HEAD_GAIN, VALUE_HEAD_GAIN};
use crate::algorithms::gaussian::PolicyOutputDistribution;
use crate::algorithms::policy::{CriticInference, PolicyInference};

/// `max(x, 0) + exp(min(x, 0)) - 1`.
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().clamp_min(0.0) + x.clamp_max(0.0).exp().sub_scalar(1.0)
}

fn hidden_stack<B: Backend>(input: usize, hidden: &[usize], device: &B::Device) -> (Vec<Linear<B>>, usize) {
    let mut layers = Vec::with_capacity(hidden.len());
    let mut width = input;
    for &h in hidden {
        layers.push(orthogonal_linear(width, h, HIDDEN_GAIN, device));
        width = h;
    }
    (layers, width)
}

fn run_stack<B: Backend>(layers: &[Linear<B>], x: Tensor<B, 2>) -> Tensor<B, 2> {
    layers.iter().fold(x, |h, layer| elu(layer.forward(h)))
}

// ============================================================================
// Configuration
// ============================================================================

/// Layer sizes shared by the default actor and critics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MlpConfig {
    pub hidden_sizes: Vec<usize>,
    /// Initial action standard deviation.
    pub init_noise_std: f32,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![256, 256, 128],
            init_noise_std: 1.0,
        }
    }
}

impl MlpConfig {
    pub fn new(hidden_sizes: Vec<usize>) -> Self {
        Self {
            hidden_sizes,
            ..Self::default()
        }
    }

    pub fn with_init_noise_std(mut self, std: f32) -> Self {
        self.init_noise_std = std;
        self
    }

    pub fn init_policy<B: Backend>(
        &self,
        obs_size: usize,
        action_dim: usize,
        device: &B::Device,
    ) -> MlpGaussianPolicy<B> {
        let (hidden, width) = hidden_stack(obs_size, &self.hidden_sizes, device);
        let log_std = Tensor::<B, 1>::ones([action_dim], device).mul_scalar(self.init_noise_std.ln());
        MlpGaussianPolicy {
            hidden,
            mean_head: orthogonal_linear(width, action_dim, POLICY_HEAD_GAIN, device),
            log_std: Param::from_tensor(log_std),
            obs_size,
            action_dim,
        }
    }

    /// A critic over `input_size` features (observations, or privileged states
    /// when running asymmetric).
    pub fn init_critic<B: Backend>(&self, input_size: usize, device: &B::Device) -> MlpCritic<B> {
        let (hidden, width) = hidden_stack(input_size, &self.hidden_sizes, device);
        MlpCritic {
            hidden,
            value_head: orthogonal_linear(width, 1, VALUE_HEAD_GAIN, device),
            input_size,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

#[derive(Module, Debug)]
pub struct MlpGaussianPolicy<B: Backend> {
    hidden: Vec<Linear<B>>,
    mean_head: Linear<B>,
    log_std: Param<Tensor<B, 1>>,
    obs_size: usize,
    action_dim: usize,
}

impl<B: Backend> PolicyInference<B> for MlpGaussianPolicy<B> {
    fn forward(&self, obs: Tensor<B, 2>, _states: Option<Tensor<B, 2>>) -> PolicyOutputDistribution<B> {
        let mean = self.mean_head.forward(run_stack(&self.hidden, obs));
        let log_std = mean.zeros_like() + self.log_std.val().unsqueeze::<2>();
        PolicyOutputDistribution::diag_gaussian(mean, log_std)
    }

    fn obs_size(&self) -> usize {
        self.obs_size
    }

    fn action_dim(&self) -> usize {
        self.action_dim
    }
}

// ============================================================================
// Critic
// ============================================================================

#[derive(Module, Debug)]
pub struct MlpCritic<B: Backend> {
    hidden: Vec<Linear<B>>,
    value_head: Linear<B>,
    input_size: usize,
}

impl<B: Backend> MlpCritic<B> {
    pub fn input_size(&self) -> usize {
        self.input_size
    }
}

impl<B: Backend> CriticInference<B> for MlpCritic<B> {
    /// Uses `states` when present, otherwise `obs`.
    fn forward(&self, obs: Tensor<B, 2>, states: Option<Tensor<B, 2>>) -> Tensor<B, 1> {
        let input = states.unwrap_or(obs);
        let batch = input.dims()[0];
        self.value_head
            .forward(run_stack(&self.hidden, input))
            .reshape([batch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flat_params::num_params;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;

    type B = NdArray<f32>;

    #[test]
    fn test_elu_matches_definition() {
        let x = Tensor::<B, 1>::from_floats([-2.0, 0.0, 3.0], &Default::default());
        let y: Vec<f32> = elu(x).into_data().iter::<f32>().collect();
        assert!((y[0] - ((-2.0f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 3.0);
    }

    #[test]
    fn test_policy_shapes_and_initial_std() {
        let device = Default::default();
        let policy = MlpConfig::new(vec![8, 8])
            .with_init_noise_std(0.5)
            .init_policy::<B>(3, 2, &device);

        let dist = policy.forward(Tensor::ones([4, 3], &device), None);
        assert_eq!(dist.mean().dims(), [4, 2]);
        let std: Vec<f32> = dist.stddev().into_data().iter::<f32>().collect();
        assert!(std.iter().all(|s| (s - 0.5).abs() < 1e-5));

        // Small head gain keeps initial means near zero.
        let max_mean: f32 = dist.mean().abs().max().into_scalar().elem();
        assert!(max_mean < 0.5);
    }

    #[test]
    fn test_param_count() {
        let policy = MlpConfig::new(vec![4]).init_policy::<B>(3, 2, &Default::default());
        // 3*4+4 hidden, 4*2+2 head, 2 log-std
        assert_eq!(num_params(&policy), 16 + 10 + 2);
    }

    #[test]
    fn test_critic_prefers_states() {
        let device = Default::default();
        let critic = MlpConfig::new(vec![8]).init_critic::<B>(5, &device);
        let obs = Tensor::<B, 2>::ones([2, 3], &device);
        let states = Tensor::<B, 2>::ones([2, 5], &device);

        let values = critic.forward(obs, Some(states));
        assert_eq!(values.dims(), [2]);
        assert_eq!(critic.input_size(), 5);
    }
}
