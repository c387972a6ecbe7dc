//! Algorithm-level tests that span several modules.
//!
//! - `cpo_tests`: the full CPO update on synthetic rollouts and the
//!   feasibility guarantees of the dual step

mod cpo_tests;
