//! CLI integration tests for restpack.

mod common;

mod audit_tests;
mod build_tests;
mod coverage_tests;
mod plan_tests;
mod run_tests;
