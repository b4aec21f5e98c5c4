//! End-to-end harness for the authentication service
//!
//! The [`Orchestrator`] launches one [`ServiceInstance`] per [`Scenario`],
//! waits for it with the [`probe`], and lets the scenario drive it over HTTP
//! and read withheld tokens through the [`bridge`]. All checks go through the
//! [`RunState`], which halts the run at the first failure.

pub mod bridge;
pub mod client;
pub mod instance;
pub mod orchestrator;
pub mod plan;
pub mod probe;
pub mod recorder;
pub mod report;
pub mod scenarios;

pub use bridge::{SqliteStore, TokenSource};
pub use client::{Reply, ServiceClient};
pub use instance::{LaunchSpec, ServiceInstance};
pub use orchestrator::Orchestrator;
pub use plan::{select, RunPlan};
pub use probe::ProbeOptions;
pub use recorder::{Failure, FailureKind, RunState};
pub use report::{RunOutcome, RunReport, ScenarioRecord};
pub use scenarios::{Scenario, ScenarioContext};
