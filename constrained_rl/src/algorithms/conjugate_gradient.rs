//! Conjugate gradient over implicit linear operators.
//!
//! Solves `A x = b` for symmetric positive (semi-)definite `A` that is only
//! available through products `p ↦ A p`. In CPO `A` is the damped Fisher
//! matrix and the solve runs once for the reward gradient and once for the
//! cost gradient.
//!
//! The iteration budget is fixed: every call performs exactly `iterations`
//! operator products, with no residual-based early exit.
//!
//! ```text
//! x = 0, r = p = b
//! repeat:
//!     α = rᵀr / (pᵀAp + ε)
//!     x = x + α p
//!     (last iteration: stop)
//!     r' = r - α Ap
//!     β = r'ᵀr' / (rᵀr + ε)
//!     p = r' + β p,  r = r'
//! ```

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::core::flat_params::flat_dot;

/// Guard added to every denominator.
pub const CG_EPS: f32 = 1e-8;

/// A linear map on flat vectors.
pub trait LinearOperator<B: Backend> {
    type Error;

    fn apply(&self, v: &Tensor<B, 1>) -> Result<Tensor<B, 1>, Self::Error>;
}

/// Explicit dense matrix, mostly for tests and small problems.
#[derive(Debug, Clone)]
pub struct MatrixOperator<B: Backend> {
    matrix: Tensor<B, 2>,
}

impl<B: Backend> MatrixOperator<B> {
    pub fn new(matrix: Tensor<B, 2>) -> Self {
        Self { matrix }
    }
}

impl<B: Backend> LinearOperator<B> for MatrixOperator<B> {
    type Error = std::convert::Infallible;

    fn apply(&self, v: &Tensor<B, 1>) -> Result<Tensor<B, 1>, Self::Error> {
        let [n] = v.dims();
        let column: Tensor<B, 2> = v.clone().reshape([n, 1]);
        Ok(self.matrix.clone().matmul(column).reshape([n]))
    }
}

/// Approximate `A⁻¹ b` with a fixed number of CG iterations.
///
/// Zero iterations return the zero vector.
pub fn conjugate_gradient<B, Op>(
    operator: &Op,
    b: &Tensor<B, 1>,
    iterations: usize,
) -> Result<Tensor<B, 1>, Op::Error>
where
    B: Backend,
    Op: LinearOperator<B>,
{
    let mut x = b.zeros_like();
    let mut r = b.clone();
    let mut p = b.clone();
    let mut r_dot_r = flat_dot(&r, &r);

    for i in 0..iterations {
        let avp = operator.apply(&p)?;
        let alpha = r_dot_r / (flat_dot(&p, &avp) + CG_EPS);
        x = x + p.clone().mul_scalar(alpha);

        if i + 1 == iterations {
            break;
        }

        let r_next = r - avp.mul_scalar(alpha);
        let r_next_dot = flat_dot(&r_next, &r_next);
        let beta = r_next_dot / (r_dot_r + CG_EPS);
        p = r_next.clone() + p.mul_scalar(beta);
        r = r_next;
        r_dot_r = r_next_dot;
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::cell::Cell;

    type B = NdArray<f32>;

    fn values(t: Tensor<B, 1>) -> Vec<f32> {
        t.into_data().iter::<f32>().collect()
    }

    /// Counts products to check the fixed budget.
    struct CountingOperator {
        inner: MatrixOperator<B>,
        calls: Cell<usize>,
    }

    impl LinearOperator<B> for CountingOperator {
        type Error = std::convert::Infallible;

        fn apply(&self, v: &Tensor<B, 1>) -> Result<Tensor<B, 1>, Self::Error> {
            self.calls.set(self.calls.get() + 1);
            self.inner.apply(v)
        }
    }

    fn spd_matrix() -> Tensor<B, 2> {
        let device = Default::default();
        Tensor::from_floats(
            [
                [4.0, 1.0, 0.0, 0.5],
                [1.0, 3.0, 0.2, 0.0],
                [0.0, 0.2, 2.0, 0.3],
                [0.5, 0.0, 0.3, 5.0],
            ],
            &device,
        )
    }

    #[test]
    fn test_solves_spd_system() {
        let device = Default::default();
        let op = MatrixOperator::new(spd_matrix());
        let b = Tensor::<B, 1>::from_floats([1.0, -2.0, 0.5, 3.0], &device);

        let x = conjugate_gradient(&op, &b, 10).unwrap();
        let residual = op.apply(&x).unwrap() - b;
        let norm = values(residual).iter().map(|v| v * v).sum::<f32>().sqrt();

        assert!(norm < 1e-3, "residual norm {}", norm);
    }

    #[test]
    fn test_runs_full_budget() {
        let device = Default::default();
        let op = CountingOperator {
            inner: MatrixOperator::new(spd_matrix()),
            calls: Cell::new(0),
        };
        let b = Tensor::<B, 1>::from_floats([1.0, 0.0, 0.0, 0.0], &device);

        let _ = conjugate_gradient(&op, &b, 10).unwrap();
        assert_eq!(op.calls.get(), 10);
    }

    #[test]
    fn test_zero_rhs_gives_zero() {
        let device = Default::default();
        let op = MatrixOperator::new(spd_matrix());
        let b = Tensor::<B, 1>::zeros([4], &device);

        let x = values(conjugate_gradient(&op, &b, 10).unwrap());
        assert!(x.iter().all(|v| *v == 0.0 && v.is_finite()));
    }

    #[test]
    fn test_identity_one_iteration() {
        let device = Default::default();
        let identity = Tensor::<B, 2>::from_floats(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            &device,
        );
        let op = MatrixOperator::new(identity);
        let b = Tensor::<B, 1>::from_floats([2.0, -1.0, 0.5], &device);

        let x = values(conjugate_gradient(&op, &b, 1).unwrap());
        for (xi, bi) in x.iter().zip([2.0, -1.0, 0.5]) {
            assert!((xi - bi).abs() < 1e-5);
        }
    }
}
