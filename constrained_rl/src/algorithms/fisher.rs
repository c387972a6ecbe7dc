//! Fisher-vector products without materialising the Fisher matrix.
//!
//! The trust region of CPO is `KL(π_θ' ‖ π_θ) ≤ δ`. Its curvature at
//! `θ' = θ` is the Hessian of the mean KL against a stop-gradient copy of
//! the current policy, which for a distribution parameterised by
//! `φ(θ) = (μ(θ), log σ(θ))` is exactly the Gauss-Newton form
//!
//! ```text
//! H = Jᵀ M J,   J = ∂φ/∂θ,   M = ∂²KL/∂φ² = diag(1/σ², 2) / N
//! ```
//!
//! (the second-derivative-of-φ term vanishes because `∂KL/∂φ = 0` at the
//! reference point). burn's autodiff is first order, so the product is
//! assembled from two first-order pieces:
//!
//! ```text
//! 1. J v   ≈ (φ(θ + h v) - φ(θ - h v)) / 2h      forward, no graph
//! 2. u     = M (J v)                              host algebra on tensors
//! 3. Jᵀ u  = ∇θ Σ (μ ⊙ u_μ + log σ ⊙ u_logσ)      one backward pass
//! 4. H v   = Jᵀ u + damping · v
//! ```
//!
//! The central difference is exact for affine maps and has O(h²) error
//! otherwise. `h` scales with `1/‖v‖` so the perturbation of θ stays small.

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;

use super::conjugate_gradient::LinearOperator;
use super::gaussian::PolicyOutputDistribution;
use super::policy::{Policy, PolicyInference};
use crate::core::flat_params::{flat_grad, flat_norm, set_params, FlatParamsError};

/// Length of the central-difference perturbation in parameter space.
const PERTURBATION_NORM: f32 = 1e-2;

/// Damped Fisher-vector product for a batch of observations.
///
/// All state the operator needs is explicit: the policy at θ, the batch and
/// the damping. The reference distribution is computed once at construction.
pub struct FisherVectorProduct<'a, B, P>
where
    B: AutodiffBackend,
    P: Policy<B>,
    P::InnerModule: PolicyInference<B::InnerBackend>,
{
    policy: &'a P,
    inner_policy: P::InnerModule,
    theta: Tensor<B::InnerBackend, 1>,
    obs: Tensor<B::InnerBackend, 2>,
    states: Option<Tensor<B::InnerBackend, 2>>,
    reference: PolicyOutputDistribution<B::InnerBackend>,
    damping: f32,
}

impl<'a, B, P> FisherVectorProduct<'a, B, P>
where
    B: AutodiffBackend,
    P: Policy<B>,
    P::InnerModule: PolicyInference<B::InnerBackend>,
{
    /// Build the operator at the policy's current parameters `theta`.
    pub fn new(
        policy: &'a P,
        theta: Tensor<B::InnerBackend, 1>,
        obs: Tensor<B::InnerBackend, 2>,
        states: Option<Tensor<B::InnerBackend, 2>>,
        damping: f32,
    ) -> Self {
        let inner_policy = policy.valid();
        let reference = inner_policy.forward(obs.clone(), states.clone());
        Self {
            policy,
            inner_policy,
            theta,
            obs,
            states,
            reference,
            damping,
        }
    }

    /// The distribution at θ on this batch.
    pub fn reference(&self) -> &PolicyOutputDistribution<B::InnerBackend> {
        &self.reference
    }

    fn distribution_at(
        &self,
        theta: Tensor<B::InnerBackend, 1>,
    ) -> Result<PolicyOutputDistribution<B::InnerBackend>, FlatParamsError> {
        let model = set_params(self.inner_policy.clone(), theta)?;
        Ok(model.forward(self.obs.clone(), self.states.clone()))
    }

    /// `J v` as (mean, log_std) directional derivatives.
    fn jacobian_vector(
        &self,
        v: &Tensor<B::InnerBackend, 1>,
        norm: f32,
    ) -> Result<(Tensor<B::InnerBackend, 2>, Tensor<B::InnerBackend, 2>), FlatParamsError> {
        let h = PERTURBATION_NORM / norm;
        let step = v.clone().mul_scalar(h);

        let plus = self.distribution_at(self.theta.clone() + step.clone())?;
        let minus = self.distribution_at(self.theta.clone() - step)?;

        let scale = 1.0 / (2.0 * h);
        let d_mean = (plus.mean() - minus.mean()).mul_scalar(scale);
        let d_log_std = (plus.log_std() - minus.log_std()).mul_scalar(scale);
        Ok((d_mean, d_log_std))
    }

    /// Undamped `Jᵀ M J v`.
    fn fisher_product(
        &self,
        v: &Tensor<B::InnerBackend, 1>,
        norm: f32,
    ) -> Result<Tensor<B::InnerBackend, 1>, FlatParamsError> {
        let (d_mean, d_log_std) = self.jacobian_vector(v, norm)?;
        let batch = self.reference.batch_size().max(1) as f32;

        let inv_var = self.reference.log_std().mul_scalar(-2.0).exp();
        let u_mean = (d_mean * inv_var).div_scalar(batch);
        let u_log_std = d_log_std.mul_scalar(2.0 / batch);

        let obs = Tensor::<B, 2>::from_inner(self.obs.clone());
        let states = self.states.clone().map(Tensor::<B, 2>::from_inner);
        let dist = self.policy.forward(obs, states);

        let pullback = (dist.mean() * Tensor::from_inner(u_mean)).sum()
            + (dist.log_std() * Tensor::from_inner(u_log_std)).sum();
        flat_grad(pullback, self.policy)
    }
}

impl<B, P> LinearOperator<B::InnerBackend> for FisherVectorProduct<'_, B, P>
where
    B: AutodiffBackend,
    P: Policy<B>,
    P::InnerModule: PolicyInference<B::InnerBackend>,
{
    type Error = FlatParamsError;

    fn apply(&self, v: &Tensor<B::InnerBackend, 1>) -> Result<Tensor<B::InnerBackend, 1>, Self::Error> {
        let damped = v.clone().mul_scalar(self.damping);
        let norm = flat_norm(v);
        if norm == 0.0 || !norm.is_finite() {
            return Ok(damped);
        }
        Ok(self.fisher_product(v, norm)? + damped)
    }
}
