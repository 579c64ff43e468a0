//! loadplan: programmatic HTTP load-test plans.
//!
//! A [`loadtest::plan::TestPlan`] describes thread groups, loop controllers
//! and request steps. The [`loadtest::engine::LoadTestEngine`] schedules one
//! virtual user per thread on a ramp-up timeline and streams every sample
//! into a results log.

pub mod loadtest;
