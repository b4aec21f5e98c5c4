//! Error types for the harness
//!
//! Errors that happen inside a scenario never escape the orchestrator: they
//! are classified with [`Error::failure_kind`] and recorded into the run
//! state, which halts the run. Only setup problems (bad config, unknown
//! scenario labels) are returned to the caller.

use std::io;
use thiserror::Error;

use crate::harness::recorder::FailureKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Service Lifecycle Errors ===
    #[error("Failed to spawn service: {0}")]
    ServiceSpawn(String),

    #[error("Service at {endpoint} not reachable after {secs} seconds")]
    StartupTimeout { endpoint: String, secs: u64 },

    #[error("Service exited before accepting connections (exit code {code:?})")]
    ServiceExited { code: Option<i32> },

    // === Endpoint / Configuration Errors ===
    #[error("Invalid service endpoint '{0}'. Expected host:port")]
    InvalidEndpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === HTTP Errors ===
    #[error("Request {request} failed: {source}")]
    Transport {
        request: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed response to {request}: {reason}")]
    MalformedResponse { request: String, reason: String },

    // === Store Errors ===
    #[error("No row in '{table}' for key {key}; the service did not persist it")]
    MissingExternalState { table: String, key: i64 },

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    // === Scenario Selection Errors ===
    #[error("Unknown scenario '{0}'. Use 'auth-e2e list' to see available scenarios")]
    UnknownScenario(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transport error for a request description like `POST /auth/login`
    pub fn transport(request: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            request: request.to_string(),
            source,
        }
    }

    /// Create a malformed response error
    pub fn malformed(request: &str, reason: impl ToString) -> Self {
        Self::MalformedResponse {
            request: request.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Which failure bucket this error lands in when it ends a scenario
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::StartupTimeout { .. } | Error::ServiceExited { .. } => {
                FailureKind::StartupTimeout
            }
            Error::MissingExternalState { .. } => FailureKind::MissingExternalState,
            Error::Transport { .. } | Error::MalformedResponse { .. } => FailureKind::Transport,
            _ => FailureKind::Harness,
        }
    }
}
