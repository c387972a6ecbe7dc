//! Runner tests.
//!
//! - `cpo_runner_tests`: rollout collection, constraint measurement, the
//!   learn loop and checkpoint resume over stub environments

mod cpo_runner_tests;
