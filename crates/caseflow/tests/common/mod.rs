//! Shared test utilities for caseflow integration tests.
//!
//! `TestHarness` runs the real HTTP collaborators against one wiremock
//! server and keeps the tracker database in a temp directory.

pub mod harness;

pub use harness::TestHarness;
