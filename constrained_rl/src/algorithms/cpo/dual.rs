//! Analytic dual of the CPO trust-region subproblem.
//!
//! With `g` the gradient of the negated reward surrogate, `b` the gradient of
//! the cost surrogate and `H` the damped Fisher matrix, CPO solves
//!
//! ```text
//! min_x  gᵀx   s.t.  ½ xᵀHx ≤ δ,   c + bᵀx ≤ 0
//! ```
//!
//! through its two-multiplier dual. Everything reduces to host scalars:
//!
//! ```text
//! q = gᵀH⁻¹g   r = gᵀH⁻¹b   s = bᵀH⁻¹b
//! A = q - r²/s                B = 2δ - c²/s
//! ```
//!
//! `c > 0` means the current policy violates the constraint. The sign of `c`
//! and of `B` (does the constraint boundary cut the trust region?) select one
//! of five regimes, see [`OptimCase`].

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Guard added to every denominator.
pub const EPS: f64 = 1e-8;

/// `bᵀb` at or below this counts as a vanishing cost gradient.
pub const COST_GRADIENT_THRESHOLD: f64 = 1e-8;

/// Feasibility regime of one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimCase {
    /// Origin infeasible and the whole trust region violates the constraint.
    /// Step purely to reduce cost.
    InfeasibleRecovery = 0,
    /// Origin infeasible but part of the trust region is feasible.
    FeasibleRecovery = 1,
    /// Origin feasible and the constraint boundary cuts the trust region.
    FeasibleIntersecting = 2,
    /// Origin feasible and the whole trust region is feasible.
    FeasibleNonIntersecting = 3,
    /// Origin feasible with a vanishing cost gradient: plain trust-region step.
    PureReturn = 4,
}

impl OptimCase {
    /// Numeric case label, 0 through 4.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Whether the pre-step policy satisfied the constraint.
    pub fn starts_feasible(self) -> bool {
        self.index() > 1
    }

    /// Select the regime.
    ///
    /// `region_b` is `B = 2δ - c²/s`; it is ignored when the pure-return
    /// shortcut applies.
    pub fn classify(c: f64, cost_grad_sq_norm: f64, region_b: f64) -> Self {
        if cost_grad_sq_norm <= COST_GRADIENT_THRESHOLD && c < 0.0 {
            return Self::PureReturn;
        }
        match (c < 0.0, region_b < 0.0) {
            (true, true) => Self::FeasibleNonIntersecting,
            (true, false) => Self::FeasibleIntersecting,
            (false, false) => Self::FeasibleRecovery,
            (false, true) => Self::InfeasibleRecovery,
        }
    }
}

impl std::fmt::Display for OptimCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InfeasibleRecovery => "infeasible recovery",
            Self::FeasibleRecovery => "feasible recovery",
            Self::FeasibleIntersecting => "feasible, boundary intersects",
            Self::FeasibleNonIntersecting => "feasible, boundary outside",
            Self::PureReturn => "pure return",
        };
        write!(f, "case {} ({})", self.index(), name)
    }
}

/// Scalar reductions feeding the dual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualInputs {
    /// `gᵀH⁻¹g`
    pub q: f64,
    /// `gᵀH⁻¹b`
    pub r: f64,
    /// `bᵀH⁻¹b`
    pub s: f64,
    /// Constraint violation, positive when infeasible.
    pub c: f64,
    /// `bᵀb`
    pub cost_grad_sq_norm: f64,
    /// Trust-region radius δ.
    pub max_kl: f64,
}

/// Multipliers and regime chosen by [`solve_dual`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualSolution {
    pub case: OptimCase,
    /// Trust-region multiplier λ.
    pub lam: f64,
    /// Cost multiplier ν.
    pub nu: f64,
    /// `A = q - r²/s` (zero for the pure-return shortcut).
    pub region_a: f64,
    /// `B = 2δ - c²/s` (zero for the pure-return shortcut).
    pub region_b: f64,
}

impl DualSolution {
    pub fn is_finite(&self) -> bool {
        self.lam.is_finite() && self.nu.is_finite()
    }

    /// Update direction `x`; the policy moves along `θ - e·x`.
    ///
    /// ```text
    /// x = (v + ν w) / (λ + ε)   case > 0
    /// x = ν w                   case 0
    /// ```
    ///
    /// `w` is `None` when the cost solve was skipped (pure return).
    pub fn search_direction<B: Backend>(
        &self,
        v: &Tensor<B, 1>,
        w: Option<&Tensor<B, 1>>,
    ) -> Tensor<B, 1> {
        let nu = self.nu as f32;
        let weighted_w = match w {
            Some(w) => w.clone().mul_scalar(nu),
            None => v.zeros_like(),
        };

        match self.case {
            OptimCase::InfeasibleRecovery => weighted_w,
            _ => (v.clone() + weighted_w).mul_scalar(1.0 / (self.lam + EPS) as f32),
        }
    }
}

/// `max(lo, min(hi, x))`; tolerates `lo > hi` and infinite bounds.
fn project(x: f64, (lo, hi): (f64, f64)) -> f64 {
    lo.max(hi.min(x))
}

/// Divide by `c`, keeping its sign when it is numerically zero.
fn guarded_ratio(r: f64, c: f64) -> f64 {
    let denom = if c.abs() < EPS {
        if c < 0.0 {
            -EPS
        } else {
            EPS
        }
    } else {
        c
    };
    r / denom
}

/// Solve the dual for λ and ν.
pub fn solve_dual(inputs: &DualInputs) -> DualSolution {
    let DualInputs {
        q,
        r,
        s,
        c,
        cost_grad_sq_norm,
        max_kl,
    } = *inputs;
    let q = q.max(0.0);

    let shortcut = cost_grad_sq_norm <= COST_GRADIENT_THRESHOLD && c < 0.0;
    let (r, s, region_a, region_b) = if shortcut {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        (r, s, q - r * r / (s + EPS), 2.0 * max_kl - c * c / (s + EPS))
    };
    let case = OptimCase::classify(c, cost_grad_sq_norm, region_b);

    let return_only_lam = (q / (2.0 * max_kl)).sqrt();

    let (lam, nu) = match case {
        OptimCase::PureReturn | OptimCase::FeasibleNonIntersecting => (return_only_lam, 0.0),
        OptimCase::FeasibleRecovery | OptimCase::FeasibleIntersecting => {
            let pivot = guarded_ratio(r, c);
            let (interval_a, interval_b) = if c < 0.0 {
                ((0.0, pivot), (pivot, f64::INFINITY))
            } else {
                ((pivot, f64::INFINITY), (0.0, pivot))
            };

            let lam_a = project((region_a.max(0.0) / region_b.max(EPS)).sqrt(), interval_a);
            let lam_b = project(return_only_lam, interval_b);

            let objective_a =
                -0.5 * (region_a / (lam_a + EPS) + region_b * lam_a) - r * c / (s + EPS);
            let objective_b = -0.5 * (q / (lam_b + EPS) + 2.0 * max_kl * lam_b);

            let lam = if objective_a >= objective_b { lam_a } else { lam_b };
            let nu = (lam * c - r).max(0.0) / (s + EPS);
            (lam, nu)
        }
        OptimCase::InfeasibleRecovery => (0.0, (2.0 * max_kl / (s + EPS)).max(0.0).sqrt()),
    };

    DualSolution {
        case,
        lam,
        nu,
        region_a,
        region_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use proptest::prelude::*;

    type B = NdArray<f32>;

    fn inputs(q: f64, r: f64, s: f64, c: f64, bb: f64) -> DualInputs {
        DualInputs {
            q,
            r,
            s,
            c,
            cost_grad_sq_norm: bb,
            max_kl: 0.02,
        }
    }

    #[test]
    fn test_pure_return_shortcut() {
        let sol = solve_dual(&inputs(0.8, 5.0, 3.0, -1.0, 0.0));
        assert_eq!(sol.case, OptimCase::PureReturn);
        assert!((sol.lam - (0.8f64 / 0.04).sqrt()).abs() < 1e-9);
        assert_eq!(sol.nu, 0.0);
        assert_eq!(sol.region_a, 0.0);
    }

    #[test]
    fn test_small_cost_gradient_but_infeasible_is_not_shortcut() {
        let sol = solve_dual(&inputs(0.8, 0.0, 1.0, 0.5, 0.0));
        assert_ne!(sol.case, OptimCase::PureReturn);
    }

    #[test]
    fn test_non_intersecting_case() {
        // c² / s large → B < 0 with c < 0.
        let sol = solve_dual(&inputs(1.0, 0.1, 0.01, -1.0, 1.0));
        assert_eq!(sol.case, OptimCase::FeasibleNonIntersecting);
        assert_eq!(sol.nu, 0.0);
        assert!((sol.lam - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_infeasible_recovery() {
        let sol = solve_dual(&inputs(1.0, 0.1, 0.01, 1.0, 1.0));
        assert_eq!(sol.case, OptimCase::InfeasibleRecovery);
        assert_eq!(sol.lam, 0.0);
        assert!((sol.nu - (0.04f64 / (0.01 + EPS)).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_intersecting_cases_have_non_negative_multipliers() {
        let feasible = solve_dual(&inputs(2.0, 0.5, 100.0, -0.1, 1.0));
        assert_eq!(feasible.case, OptimCase::FeasibleIntersecting);
        assert!(feasible.lam >= 0.0 && feasible.nu >= 0.0);

        let recovery = solve_dual(&inputs(2.0, 0.5, 100.0, 0.1, 1.0));
        assert_eq!(recovery.case, OptimCase::FeasibleRecovery);
        assert!(recovery.lam >= 0.0 && recovery.nu >= 0.0);
        assert!(recovery.is_finite());
    }

    #[test]
    fn test_zero_violation_is_finite() {
        let sol = solve_dual(&inputs(2.0, 0.5, 100.0, 0.0, 1.0));
        assert_eq!(sol.case, OptimCase::FeasibleRecovery);
        assert!(sol.is_finite());
    }

    #[test]
    fn test_search_direction_per_case() {
        let device = Default::default();
        let v = Tensor::<B, 1>::from_floats([1.0, 2.0], &device);
        let w = Tensor::<B, 1>::from_floats([0.5, -1.0], &device);

        let recovery = DualSolution {
            case: OptimCase::InfeasibleRecovery,
            lam: 0.0,
            nu: 2.0,
            region_a: 0.0,
            region_b: 0.0,
        };
        let x: Vec<f32> = recovery.search_direction(&v, Some(&w)).into_data().iter::<f32>().collect();
        assert_eq!(x, vec![1.0, -2.0]);

        let trpo = DualSolution {
            case: OptimCase::PureReturn,
            lam: 2.0,
            nu: 0.0,
            region_a: 0.0,
            region_b: 0.0,
        };
        let x: Vec<f32> = trpo.search_direction(&v, None).into_data().iter::<f32>().collect();
        assert!((x[0] - 0.5).abs() < 1e-6 && (x[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_case_display() {
        assert_eq!(OptimCase::PureReturn.to_string(), "case 4 (pure return)");
        assert!(OptimCase::FeasibleIntersecting.starts_feasible());
        assert!(!OptimCase::FeasibleRecovery.starts_feasible());
    }

    proptest! {
        #[test]
        fn prop_case_selection_is_exhaustive_and_exclusive(
            c in -10.0f64..10.0,
            bb in prop_oneof![Just(0.0f64), 0.0f64..2e-8, 1e-6f64..10.0],
            region_b in -10.0f64..10.0,
        ) {
            let case = OptimCase::classify(c, bb, region_b);
            let predicates = [
                c >= 0.0 && region_b < 0.0 && !(bb <= 1e-8 && c < 0.0),
                c >= 0.0 && region_b >= 0.0,
                c < 0.0 && region_b >= 0.0 && bb > 1e-8,
                c < 0.0 && region_b < 0.0 && bb > 1e-8,
                bb <= 1e-8 && c < 0.0,
            ];
            prop_assert_eq!(predicates.iter().filter(|p| **p).count(), 1);
            prop_assert!(predicates[case.index() as usize]);
        }

        #[test]
        fn prop_multipliers_are_finite_and_non_negative(
            q in 0.0f64..100.0,
            r in -10.0f64..10.0,
            s in 0.0f64..100.0,
            c in -5.0f64..5.0,
            bb in 0.0f64..10.0,
        ) {
            let sol = solve_dual(&inputs(q, r, s, c, bb));
            prop_assert!(sol.is_finite());
            prop_assert!(sol.lam >= 0.0);
            prop_assert!(sol.nu >= 0.0);
        }
    }
}
