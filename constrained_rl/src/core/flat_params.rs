//! Flat parameter vectors for trust-region updates.
//!
//! Second-order policy updates reason about the policy as a single point
//! `θ ∈ ℝⁿ`: the conjugate-gradient solve, the search direction and every
//! line-search candidate are flat vectors. This module converts between a
//! burn [`Module`] and that representation.
//!
//! # Ordering
//!
//! Parameters are visited with a [`ModuleMapper`], which walks a module's
//! fields in declaration order. The order is deterministic for a given
//! architecture, so `get_flat_params` / `set_params` / `flat_grad` all agree
//! on which slice of the vector belongs to which parameter block.
//!
//! ```text
//! ┌──────────── θ ─────────────┐
//! │ w₀ (64×8) │ b₀ (64) │ ... │ log_std (A) │
//! └────────────────────────────┘
//! ```
//!
//! # Gradients
//!
//! burn's autodiff is first order. [`flat_grad`] consumes the graph of the
//! loss it differentiates; callers needing a second gradient of the same
//! quantity re-run the forward pass. Hessian-vector products are provided by
//! [`crate::algorithms::fisher`] rather than by differentiating a gradient.

use burn::module::{AutodiffModule, Module, ModuleMapper, Param};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use thiserror::Error;

/// Errors raised while converting between modules and flat vectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlatParamsError {
    /// The flat vector does not match the module's parameter count.
    #[error("flat parameter vector has {actual} elements, module expects {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    /// Nothing to flatten (module without float parameters, or empty input).
    #[error("cannot flatten an empty parameter set")]
    EmptyParameterSet,
}

// ============================================================================
// Flatten / Dot
// ============================================================================

/// Concatenate 1-D blocks, in the given order, into one vector.
///
/// Multi-dimensional tensors are reshaped to 1-D by the caller (the mappers
/// below do this per parameter), so the element count is preserved.
pub fn flatten<B: Backend>(blocks: Vec<Tensor<B, 1>>) -> Result<Tensor<B, 1>, FlatParamsError> {
    if blocks.is_empty() {
        return Err(FlatParamsError::EmptyParameterSet);
    }
    Ok(Tensor::cat(blocks, 0))
}

/// Inner product of two flat vectors, reduced to a host scalar.
pub fn flat_dot<B: Backend>(a: &Tensor<B, 1>, b: &Tensor<B, 1>) -> f32 {
    (a.clone() * b.clone()).sum().into_scalar().elem::<f32>()
}

/// Euclidean norm of a flat vector.
pub fn flat_norm<B: Backend>(v: &Tensor<B, 1>) -> f32 {
    flat_dot(v, v).max(0.0).sqrt()
}

/// Total number of float parameters in a module.
pub fn num_params<B: Backend, M: Module<B>>(module: &M) -> usize {
    module.num_params()
}

// ============================================================================
// Mappers
// ============================================================================

/// Collects every float parameter as a 1-D block.
struct ParamCollector<B: Backend> {
    blocks: Vec<Tensor<B, 1>>,
}

impl<B: Backend> ModuleMapper<B> for ParamCollector<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let value = param.val();
        let numel: usize = value.dims().iter().product();
        self.blocks.push(value.reshape([numel]));
        param
    }
}

/// Writes consecutive slices of a flat vector back into each parameter.
///
/// Parameter ids are kept so optimizer state and gradient lookups stay
/// attached to the same parameters.
struct ParamWriter<B: Backend> {
    flat: Tensor<B, 1>,
    offset: usize,
}

impl<B: Backend> ModuleMapper<B> for ParamWriter<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let value = param.val();
        let dims = value.dims();
        let numel: usize = dims.iter().product();

        let block = self
            .flat
            .clone()
            .slice([self.offset..self.offset + numel])
            .reshape(dims)
            .set_require_grad(value.is_require_grad());
        self.offset += numel;

        Param::initialized(param.id.clone(), block)
    }
}

/// Collects `∂loss/∂p` for every parameter `p` of an autodiff module.
struct GradientCollector<'a, B: AutodiffBackend> {
    grads: &'a B::Gradients,
    blocks: Vec<Tensor<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> ModuleMapper<B> for GradientCollector<'_, B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let value = param.val();
        let numel: usize = value.dims().iter().product();

        // Parameters the loss never reached contribute a zero block.
        let block = match value.grad(self.grads) {
            Some(grad) => grad.reshape([numel]),
            None => value.inner().zeros_like().reshape([numel]),
        };
        self.blocks.push(block);

        param
    }
}

/// Sums `Σ p²` over every float parameter, keeping the autodiff graph.
struct SquaredNormAccumulator<B: Backend> {
    total: Option<Tensor<B, 1>>,
}

impl<B: Backend> ModuleMapper<B> for SquaredNormAccumulator<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let block = param.val().powf_scalar(2.0).sum();
        self.total = Some(match self.total.take() {
            Some(total) => total + block,
            None => block,
        });
        param
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Flatten a module's parameters in its canonical traversal order.
pub fn get_flat_params<B: Backend, M: Module<B>>(
    module: &M,
) -> Result<Tensor<B, 1>, FlatParamsError> {
    let mut collector = ParamCollector { blocks: Vec::new() };
    let _ = module.clone().map(&mut collector);
    flatten(collector.blocks)
}

/// Write a flat vector back into a module.
///
/// Each parameter block receives the next `numel` elements, reshaped to the
/// block's shape. Fails with [`FlatParamsError::ShapeMismatch`] when the
/// vector length differs from the module's parameter count; the module is
/// consumed either way, matching burn's by-value module updates.
pub fn set_params<B: Backend, M: Module<B>>(
    module: M,
    flat: Tensor<B, 1>,
) -> Result<M, FlatParamsError> {
    let expected = module.num_params();
    let [actual] = flat.dims();
    if expected != actual {
        return Err(FlatParamsError::ShapeMismatch { expected, actual });
    }

    let mut writer = ParamWriter { flat, offset: 0 };
    Ok(module.map(&mut writer))
}

/// Gradient of a scalar loss w.r.t. every parameter of `module`, flattened.
///
/// The loss graph is consumed. The returned vector lives on the inner
/// backend and carries no autodiff history.
pub fn flat_grad<B: AutodiffBackend, M: AutodiffModule<B>>(
    loss: Tensor<B, 1>,
    module: &M,
) -> Result<Tensor<B::InnerBackend, 1>, FlatParamsError> {
    let grads = loss.backward();
    let mut collector = GradientCollector::<B> {
        grads: &grads,
        blocks: Vec::new(),
    };
    let _ = module.clone().map(&mut collector);
    flatten(collector.blocks)
}

/// `Σ p²` over all parameters, as a differentiable scalar tensor.
///
/// Returns `None` for modules without float parameters.
pub fn squared_l2_norm<B: Backend, M: Module<B>>(module: &M) -> Option<Tensor<B, 1>> {
    let mut accumulator = SquaredNormAccumulator { total: None };
    let _ = module.clone().map(&mut accumulator);
    accumulator.total
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{Linear, LinearConfig};

    type B = Autodiff<NdArray<f32>>;
    type InnerB = NdArray<f32>;

    #[derive(Module, Debug)]
    struct TwoLayer<B: Backend> {
        first: Linear<B>,
        second: Linear<B>,
        scale: Param<Tensor<B, 1>>,
    }

    impl<B: Backend> TwoLayer<B> {
        fn new(device: &B::Device) -> Self {
            Self {
                first: LinearConfig::new(3, 4).init(device),
                second: LinearConfig::new(4, 2).init(device),
                scale: Param::from_tensor(Tensor::ones([2], device)),
            }
        }

        fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
            let h = self.first.forward(x).tanh();
            self.second.forward(h) * self.scale.val().unsqueeze_dim(0)
        }
    }

    fn to_vec<BK: Backend>(t: Tensor<BK, 1>) -> Vec<f32> {
        t.into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_flat_params_length_matches_param_count() {
        let device = Default::default();
        let model = TwoLayer::<InnerB>::new(&device);

        let flat = get_flat_params(&model).unwrap();

        // 3*4 + 4 + 4*2 + 2 + 2
        assert_eq!(flat.dims()[0], 28);
        assert_eq!(num_params(&model), 28);
    }

    #[test]
    fn test_round_trip_is_bit_identical() {
        let device = Default::default();
        let model = TwoLayer::<InnerB>::new(&device);
        let before = to_vec(get_flat_params(&model).unwrap());

        let restored = set_params(model, Tensor::from_floats(before.as_slice(), &device)).unwrap();
        let after = to_vec(get_flat_params(&restored).unwrap());

        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_set_params_writes_values_in_order() {
        let device = Default::default();
        let model = TwoLayer::<InnerB>::new(&device);
        let n = num_params(&model);
        let ramp: Vec<f32> = (0..n).map(|i| i as f32).collect();

        let model = set_params(model, Tensor::from_floats(ramp.as_slice(), &device)).unwrap();

        assert_eq!(to_vec(get_flat_params(&model).unwrap()), ramp);
        // The trailing block is the `scale` parameter.
        assert_eq!(to_vec(model.scale.val()), vec![26.0, 27.0]);
    }

    #[test]
    fn test_set_params_shape_mismatch() {
        let device = Default::default();
        let model = TwoLayer::<InnerB>::new(&device);

        let err = set_params(model, Tensor::zeros([5], &device)).unwrap_err();
        assert_eq!(
            err,
            FlatParamsError::ShapeMismatch {
                expected: 28,
                actual: 5
            }
        );
    }

    #[test]
    fn test_flatten_empty_is_error() {
        let blocks: Vec<Tensor<InnerB, 1>> = Vec::new();
        assert_eq!(flatten(blocks).unwrap_err(), FlatParamsError::EmptyParameterSet);
    }

    #[test]
    fn test_flat_grad_of_linear_loss() {
        let device = Default::default();
        let model = TwoLayer::<B>::new(&device);

        // d/dθ Σ θ² = 2θ
        let loss = squared_l2_norm(&model).unwrap();
        let grad = to_vec(flat_grad(loss, &model).unwrap());
        let params = to_vec(get_flat_params(&model.valid()).unwrap());

        for (g, p) in grad.iter().zip(params.iter()) {
            assert!((g - 2.0 * p).abs() < 1e-5, "grad {} vs param {}", g, p);
        }
    }

    #[test]
    fn test_flat_grad_zero_for_unused_parameters() {
        let device = Default::default();
        let model = TwoLayer::<B>::new(&device);

        // Only the `scale` parameter participates.
        let loss = model.scale.val().sum();
        let grad = to_vec(flat_grad(loss, &model).unwrap());

        assert!(grad[..26].iter().all(|g| *g == 0.0));
        assert_eq!(&grad[26..], &[1.0, 1.0]);
    }

    #[test]
    fn test_set_params_keeps_gradient_tracking() {
        let device = Default::default();
        let model = TwoLayer::<B>::new(&device);
        let flat = get_flat_params(&model.valid()).unwrap().mul_scalar(0.5);

        let model = set_params(model, Tensor::from_inner(flat)).unwrap();

        let x = Tensor::<B, 2>::ones([5, 3], &device);
        let loss = model.forward(x).sum();
        let grad = to_vec(flat_grad(loss, &model).unwrap());
        assert!(grad.iter().any(|g| g.abs() > 0.0));
    }

    #[test]
    fn test_flat_dot_and_norm() {
        let device = Default::default();
        let a = Tensor::<InnerB, 1>::from_floats([1.0, 2.0, 2.0], &device);
        let b = Tensor::<InnerB, 1>::from_floats([0.5, -1.0, 4.0], &device);

        assert!((flat_dot(&a, &b) - 6.5).abs() < 1e-6);
        assert!((flat_norm(&a) - 3.0).abs() < 1e-6);
    }
}
