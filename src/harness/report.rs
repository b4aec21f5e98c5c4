//! Run report

use std::path::Path;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

use super::recorder::Failure;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    AllPassed,
    HaltedAt { label: String },
}

/// One executed scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub label: String,
    pub passed: bool,
    pub duration_ms: u64,
}

/// Everything a run produced, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub scenarios: Vec<ScenarioRecord>,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::AllPassed
    }

    /// Write the report as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Wrote run report");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Final summary line
    pub fn print_summary(&self) {
        let passed = self.scenarios.iter().filter(|s| s.passed).count();
        match &self.outcome {
            RunOutcome::AllPassed => println!(
                "\n{} {}",
                "✓".green().bold(),
                format!("All {} scenarios passed", passed).green().bold()
            ),
            RunOutcome::HaltedAt { label } => {
                println!(
                    "\n{} {} ({} passed before it)",
                    "✗".red().bold(),
                    format!("Run halted at {}", label).red().bold(),
                    passed
                );
                if let Some(failure) = self.failures.first() {
                    println!("  {} {}", format!("[{}]", failure.kind).dimmed(), failure.message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::recorder::FailureKind;

    fn halted() -> RunReport {
        RunReport {
            outcome: RunOutcome::HaltedAt {
                label: "register_verify".to_string(),
            },
            scenarios: vec![
                ScenarioRecord {
                    label: "register".to_string(),
                    passed: true,
                    duration_ms: 40,
                },
                ScenarioRecord {
                    label: "register_verify".to_string(),
                    passed: false,
                    duration_ms: 55,
                },
            ],
            failures: vec![Failure {
                label: "register_verify".to_string(),
                kind: FailureKind::MissingExternalState,
                message: "No row in 'verifications' for key 1".to_string(),
            }],
        }
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(halted()).unwrap();
        assert_eq!(json["outcome"]["status"], "halted_at");
        assert_eq!(json["outcome"]["label"], "register_verify");
        assert_eq!(json["failures"][0]["kind"], "missing_external_state");
        assert_eq!(json["scenarios"][1]["passed"], false);

        let passed = serde_json::to_value(RunOutcome::AllPassed).unwrap();
        assert_eq!(passed["status"], "all_passed");
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let report = halted();
        report.write(&path).unwrap();
        let loaded = RunReport::load(&path).unwrap();

        assert!(!loaded.passed());
        assert_eq!(loaded.outcome, report.outcome);
        assert_eq!(loaded.scenarios, report.scenarios);
        assert_eq!(loaded.failures, report.failures);
    }
}
