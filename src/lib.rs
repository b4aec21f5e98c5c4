//! auth-e2e - end-to-end harness for the authentication service
//!
//! This library provides the harness behind the `auth-e2e` binary: service
//! lifecycle, readiness probing, the scenario library and the run
//! orchestrator.

pub mod cli;
pub mod commands;
pub mod common;
pub mod harness;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use harness::{Orchestrator, RunOutcome, RunReport, RunState, Scenario};
