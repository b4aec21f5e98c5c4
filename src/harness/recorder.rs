//! Assertion recording and run state
//!
//! [`RunState`] is threaded through every scenario. The first failed check
//! halts the run; every check after that only prints what it observed, so the
//! operator sees the state the service was left in without a cascade of
//! follow-on failures. The halt is sticky for the whole run.

use std::fmt;

use colored::Colorize;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::Error;

/// What ended a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service never accepted connections
    StartupTimeout,
    /// An observed value or body did not match
    AssertionMismatch,
    /// A token row the service should have written is absent
    MissingExternalState,
    /// The HTTP call failed or its response could not be read
    Transport,
    /// Anything else that prevented the scenario from running
    Harness,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::StartupTimeout => "startup timeout",
            FailureKind::AssertionMismatch => "assertion mismatch",
            FailureKind::MissingExternalState => "missing external state",
            FailureKind::Transport => "transport error",
            FailureKind::Harness => "harness error",
        };
        f.write_str(s)
    }
}

/// A recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub label: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Process-wide state for one run
#[derive(Debug, Default)]
pub struct RunState {
    halted: bool,
    failures: Vec<Failure>,
    transcript: Vec<String>,
    quiet: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state that records without printing
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Failures in the order they were recorded
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn first_failure(&self) -> Option<&Failure> {
        self.failures.first()
    }

    /// Every line the recorder emitted
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Equality check. Composite values (JSON objects) compare structurally.
    ///
    /// Returns true only when the check ran and passed.
    pub fn expect<T>(&mut self, label: &str, field: &str, actual: &T, expected: &T) -> bool
    where
        T: PartialEq + fmt::Display + ?Sized,
    {
        if self.halted {
            self.trail(label, field, actual);
            return false;
        }

        if actual != expected {
            self.fail(
                label,
                FailureKind::AssertionMismatch,
                format!("Expected {} to be {}, but it is {}", field, expected, actual),
            );
            return false;
        }

        tracing::debug!(label, field, %actual, "check passed");
        true
    }

    /// Pattern check: passes when `pattern` matches somewhere in `actual`
    pub fn expect_pattern(&mut self, label: &str, field: &str, actual: &str, pattern: &str) -> bool {
        if self.halted {
            self.trail(label, field, actual);
            return false;
        }

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                self.fail(
                    label,
                    FailureKind::Harness,
                    format!("Invalid pattern '{}' for {}: {}", pattern, field, e),
                );
                return false;
            }
        };

        if !regex.is_match(actual) {
            self.fail(
                label,
                FailureKind::AssertionMismatch,
                format!("Expected {} to match '{}', but it is {}", field, pattern, actual),
            );
            return false;
        }

        tracing::debug!(label, field, pattern, "pattern matched");
        true
    }

    /// Record an error that ended a scenario step
    pub fn record_error(&mut self, label: &str, error: &Error) {
        self.fail(label, error.failure_kind(), error.to_string());
    }

    /// Unwrap a step result, recording the error and yielding `None` on failure
    pub fn settle<T>(&mut self, label: &str, result: crate::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error(label, &e);
                None
            }
        }
    }

    /// Halt the run with a failure, unless it is already halted
    pub fn fail(&mut self, label: &str, kind: FailureKind, message: String) {
        if self.halted {
            let line = format!("{}: {} (after halt)", label, message);
            tracing::debug!(label, %kind, "failure after halt: {}", message);
            self.emit(line.dimmed().to_string(), line);
            return;
        }

        tracing::warn!(label, %kind, "{}", message);
        let line = format!("{}: {}", label, message);
        self.emit(format!("{}: {}", label.bold(), message.red()), line);

        self.halted = true;
        self.failures.push(Failure {
            label: label.to_string(),
            kind,
            message,
        });
    }

    /// Print the `label Ok` / `label Error` line for a finished scenario
    pub fn verdict(&mut self, label: &str, passed: bool) {
        let (plain, styled) = if passed {
            (format!("{} Ok", label), format!("{} {}", label, "Ok".green()))
        } else {
            (
                format!("{} Error", label),
                format!("{} {}", label, "Error".red().bold()),
            )
        };
        self.emit(styled, plain);
    }

    fn trail<T: fmt::Display + ?Sized>(&mut self, label: &str, field: &str, actual: &T) {
        let line = format!("{}: {} is {}", label, field, actual);
        self.emit(line.dimmed().to_string(), line);
    }

    fn emit(&mut self, styled: String, plain: String) {
        if !self.quiet {
            println!("{}", styled);
        }
        self.transcript.push(plain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expect_passes_without_halting() {
        let mut state = RunState::quiet();
        assert!(state.expect("register", "status", &201, &201));
        assert!(!state.is_halted());
        assert!(state.failures().is_empty());
        assert!(state.transcript().is_empty());
    }

    #[test]
    fn test_first_mismatch_halts() {
        let mut state = RunState::quiet();
        assert!(!state.expect("register", "status", &400, &201));
        assert!(state.is_halted());

        let failure = state.first_failure().unwrap();
        assert_eq!(failure.label, "register");
        assert_eq!(failure.kind, FailureKind::AssertionMismatch);
        assert_eq!(failure.message, "Expected status to be 201, but it is 400");
    }

    #[test]
    fn test_checks_after_halt_only_log() {
        let mut state = RunState::quiet();
        state.expect("register", "status", &400, &201);

        // Would also mismatch, but must not be recorded as a second failure
        assert!(!state.expect("register", "account_id", &json!({"account_id": 2}), &json!({"account_id": 1})));
        // Would pass, but still reports false because the run is halted
        assert!(!state.expect("register", "status", &201, &201));

        assert_eq!(state.failures().len(), 1);
        assert_eq!(
            state.transcript()[1..],
            [
                r#"register: account_id is {"account_id":2}"#.to_string(),
                "register: status is 201".to_string(),
            ]
        );
    }

    #[test]
    fn test_expect_is_structural_for_json() {
        let mut state = RunState::quiet();
        let actual: serde_json::Value =
            serde_json::from_str(r#"{"last_name":"B","first_name":"A","account_id":1}"#).unwrap();
        let expected = json!({"account_id": 1, "first_name": "A", "last_name": "B"});
        assert!(state.expect("retrieve_user", "body", &actual, &expected));
    }

    #[test]
    fn test_expect_pattern() {
        let mut state = RunState::quiet();
        assert!(state.expect_pattern(
            "register_verify",
            "body",
            "<h1>Verification successful</h1>",
            ".*successful.*"
        ));
        assert!(state.expect_pattern("login", "body", r#"{"jwt":"abc.def"}"#, r#"\{"jwt":.*\}"#));
        assert!(!state.is_halted());

        assert!(!state.expect_pattern("register_verify", "body", "Verification failed", ".*successful.*"));
        assert_eq!(state.first_failure().unwrap().kind, FailureKind::AssertionMismatch);
    }

    #[test]
    fn test_invalid_pattern_is_a_harness_failure() {
        let mut state = RunState::quiet();
        assert!(!state.expect_pattern("login", "body", "{}", "("));
        assert_eq!(state.first_failure().unwrap().kind, FailureKind::Harness);
    }

    #[test]
    fn test_errors_halt_with_their_kind() {
        let mut state = RunState::quiet();
        let missing = Error::MissingExternalState {
            table: "verifications".to_string(),
            key: 1,
        };
        let value: Option<String> = state.settle("register_verify", Err(missing));
        assert!(value.is_none());
        assert!(state.is_halted());
        assert_eq!(state.first_failure().unwrap().kind, FailureKind::MissingExternalState);

        // A later error is logged but does not replace the first failure
        state.record_error("register_verify", &Error::Internal("late".to_string()));
        assert_eq!(state.failures().len(), 1);
        assert!(state.transcript().last().unwrap().ends_with("(after halt)"));
    }

    #[test]
    fn test_verdict_lines() {
        let mut state = RunState::quiet();
        state.verdict("register", true);
        state.verdict("register_resend", false);
        assert_eq!(
            state.transcript(),
            ["register Ok".to_string(), "register_resend Error".to_string()]
        );
        // Verdicts are output only; they never halt
        assert!(!state.is_halted());
    }

    #[test]
    fn test_settle_passes_values_through() {
        let mut state = RunState::quiet();
        assert_eq!(state.settle("login", Ok(7)), Some(7));
        assert!(!state.is_halted());
    }
}
