//! Run orchestration
//!
//! Each scenario gets its own service instance:
//! spawn, wait until reachable, execute, tear down. The run stops after the
//! first scenario that leaves the [`RunState`] halted.

use std::time::{Duration, Instant};

use crate::common::config::{Account, Config, ServiceEndpoint, StoreConfig};
use crate::common::Result;

use super::bridge::{SqliteStore, TokenSource};
use super::client::ServiceClient;
use super::instance::{LaunchSpec, ServiceInstance};
use super::recorder::RunState;
use super::report::{RunOutcome, RunReport, ScenarioRecord};
use super::scenarios::{Scenario, ScenarioContext};

/// Runs scenarios against fresh service instances
pub struct Orchestrator {
    launch: LaunchSpec,
    store: Box<dyn TokenSource>,
    tables: StoreConfig,
    account: Account,
    request_timeout: Duration,
}

impl Orchestrator {
    /// Resolve launch settings and the endpoint once for the whole run
    pub fn new(config: &Config) -> Result<Self> {
        let launch = LaunchSpec::from_config(config)?;
        tracing::debug!(
            endpoint = %launch.endpoint,
            store = %launch.store_path.display(),
            "Resolved service settings"
        );

        Ok(Self {
            store: Box::new(SqliteStore::new(launch.store_path.clone())),
            launch,
            tables: config.store.clone(),
            account: config.account.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Replace the fixture account
    pub fn with_account(mut self, account: Account) -> Self {
        self.account = account;
        self
    }

    /// Replace the token source
    pub fn with_store(mut self, store: Box<dyn TokenSource>) -> Self {
        self.store = store;
        self
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.launch.endpoint
    }

    /// Run `scenarios` in order, stopping at the first halt
    pub async fn run(&self, scenarios: &[Scenario], state: &mut RunState) -> RunReport {
        let mut records = Vec::with_capacity(scenarios.len());
        let mut outcome = RunOutcome::AllPassed;

        if let Some(failure) = state.first_failure() {
            // Halted before anything ran; nothing may be spawned
            outcome = RunOutcome::HaltedAt {
                label: failure.label.clone(),
            };
        } else {
            for &scenario in scenarios {
                let label = scenario.label();
                let started = Instant::now();

                self.run_one(scenario, state).await;

                let passed = !state.is_halted();
                state.verdict(label, passed);
                records.push(ScenarioRecord {
                    label: label.to_string(),
                    passed,
                    duration_ms: started.elapsed().as_millis() as u64,
                });

                if !passed {
                    tracing::info!(label, "Run halted");
                    outcome = RunOutcome::HaltedAt {
                        label: label.to_string(),
                    };
                    break;
                }
            }
        }

        RunReport {
            outcome,
            scenarios: records,
            failures: state.failures().to_vec(),
        }
    }

    /// Spawn, await ready, execute, tear down
    async fn run_one(&self, scenario: Scenario, state: &mut RunState) {
        let label = scenario.label();
        tracing::info!(label, "Starting scenario");

        let instance = match ServiceInstance::launch(&self.launch, label).await {
            Ok(instance) => instance,
            Err(e) => {
                state.record_error(label, &e);
                return;
            }
        };

        match ServiceClient::new(instance.endpoint(), self.request_timeout) {
            Ok(client) => {
                let mut ctx = ScenarioContext {
                    client: &client,
                    store: self.store.as_ref(),
                    tables: &self.tables,
                    account: &self.account,
                    state: &mut *state,
                };
                scenario.run(&mut ctx).await;
            }
            Err(e) => state.record_error(label, &e),
        }

        // The port must be free again before the next spawn
        if let Err(e) = instance.shutdown(&self.launch).await {
            state.record_error(label, &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::recorder::FailureKind;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config(program: &str, args: &[&str], dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.service.program = program.to_string();
        config.service.args = args.iter().map(|s| s.to_string()).collect();
        config.service.workdir = Some(dir.to_path_buf());
        config.service.env_file = None;
        config
            .service
            .env
            .insert("BACKEND_URL".to_string(), format!("127.0.0.1:{}", free_port()));
        config.timeouts.startup_secs = 1;
        config.timeouts.poll_interval_ms = 20;
        config.timeouts.connect_attempt_ms = 100;
        config
    }

    #[test]
    fn test_new_resolves_endpoint_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("sh", &[], dir.path());
        config
            .service
            .env
            .insert("BACKEND_URL".to_string(), "http://127.0.0.1:8123".to_string());

        let orchestrator = Orchestrator::new(&config).unwrap();
        assert_eq!(orchestrator.endpoint().port, 8123);
        assert_eq!(orchestrator.launch.store_path, dir.path().join("db.sqlite"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_timeout_halts_at_first_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(&config("sleep", &["30"], dir.path())).unwrap();
        let mut state = RunState::quiet();

        let report = orchestrator
            .run(&[Scenario::Register, Scenario::Login], &mut state)
            .await;

        assert_eq!(
            report.outcome,
            RunOutcome::HaltedAt {
                label: "register".to_string()
            }
        );
        assert_eq!(report.scenarios.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::StartupTimeout);
        assert_eq!(state.transcript().last().unwrap(), "register Error");
    }

    #[tokio::test]
    async fn test_already_halted_run_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        // A program that cannot be spawned would record a second failure line
        let mut config = config("sh", &[], dir.path());
        config.service.program = dir.path().join("missing").display().to_string();
        let orchestrator = Orchestrator::new(&config).unwrap();

        let mut state = RunState::quiet();
        state.expect("earlier", "status", &500, &200);
        let report = orchestrator.run(&Scenario::ALL, &mut state).await;

        assert_eq!(
            report.outcome,
            RunOutcome::HaltedAt {
                label: "earlier".to_string()
            }
        );
        assert!(report.scenarios.is_empty());
        assert_eq!(state.transcript().len(), 1);
    }
}
