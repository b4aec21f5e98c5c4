//! Configuration file handling
//!
//! The harness reads `config.toml` (see [`super::paths::config_path`]) and the
//! service's env file. Neither mutates the harness's own environment: the
//! merged variables are only handed to the spawned service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{self, config_path};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// How to launch the service under test
    #[serde(default)]
    pub service: ServiceConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Where the service keeps the tokens the API withholds
    #[serde(default)]
    pub store: StoreConfig,

    /// Identity used by the scenarios
    #[serde(default)]
    pub account: Account,
}

/// Service launch settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Program to run (resolved through PATH when not a path)
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments for the program
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory for the service; relative paths below resolve against it
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Env file with `NAME value` or `NAME=value` lines
    #[serde(default = "default_env_file")]
    pub env_file: Option<PathBuf>,

    /// Variable holding the `host:port` the service listens on
    #[serde(default = "default_endpoint_var")]
    pub endpoint_var: String,

    /// SQLite file the service persists to
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Delete the store file before every spawn
    #[serde(default = "default_true")]
    pub fresh_store: bool,

    /// Write service stdout/stderr to the log directory instead of discarding it
    #[serde(default)]
    pub capture_output: bool,

    /// Extra variables, applied after the env file
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            workdir: None,
            env_file: default_env_file(),
            endpoint_var: default_endpoint_var(),
            store_path: default_store_path(),
            fresh_store: true,
            capture_output: false,
            env: BTreeMap::new(),
        }
    }
}

fn default_program() -> String {
    "cargo".to_string()
}
fn default_args() -> Vec<String> {
    vec!["run".to_string()]
}
fn default_env_file() -> Option<PathBuf> {
    Some(PathBuf::from(".env"))
}
fn default_endpoint_var() -> String {
    "BACKEND_URL".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("db.sqlite")
}
fn default_true() -> bool {
    true
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Upper bound on waiting for the service port to accept connections
    #[serde(default = "default_startup")]
    pub startup_secs: u64,

    /// Sleep between connection attempts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Bound on a single connection attempt
    #[serde(default = "default_connect_attempt")]
    pub connect_attempt_ms: u64,

    /// Bound on a single HTTP request
    #[serde(default = "default_request")]
    pub request_secs: u64,

    /// Time between SIGTERM and SIGKILL on teardown; 0 kills immediately
    #[serde(default)]
    pub shutdown_grace_ms: u64,

    /// Bound on waiting for the port to close after teardown
    #[serde(default = "default_release")]
    pub release_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup_secs: default_startup(),
            poll_interval_ms: default_poll_interval(),
            connect_attempt_ms: default_connect_attempt(),
            request_secs: default_request(),
            shutdown_grace_ms: 0,
            release_secs: default_release(),
        }
    }
}

fn default_startup() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    100
}
fn default_connect_attempt() -> u64 {
    1000
}
fn default_request() -> u64 {
    10
}
fn default_release() -> u64 {
    5
}

/// A table holding one token per pending request, keyed by account id
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TokenTable {
    pub table: String,
    pub key_column: String,
    pub token_column: String,
}

impl TokenTable {
    pub fn new(table: &str, key_column: &str, token_column: &str) -> Self {
        Self {
            table: table.to_string(),
            key_column: key_column.to_string(),
            token_column: token_column.to_string(),
        }
    }
}

/// Token tables in the service's store
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_verification")]
    pub verification: TokenTable,

    #[serde(default = "default_password_reset")]
    pub password_reset: TokenTable,

    #[serde(default = "default_email_update")]
    pub email_update: TokenTable,

    #[serde(default = "default_account_deletion")]
    pub account_deletion: TokenTable,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            verification: default_verification(),
            password_reset: default_password_reset(),
            email_update: default_email_update(),
            account_deletion: default_account_deletion(),
        }
    }
}

fn default_verification() -> TokenTable {
    TokenTable::new("verifications", "user_id", "verification_token")
}
fn default_password_reset() -> TokenTable {
    TokenTable::new("password_resets", "user_id", "reset_token")
}
fn default_email_update() -> TokenTable {
    TokenTable::new("email_updates", "user_id", "change_token")
}
fn default_account_deletion() -> TokenTable {
    TokenTable::new("delete_requests", "user_id", "delete_token")
}

/// The identity every scenario registers
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Account {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    /// `m` or `f`
    pub gender: String,

    /// Values the update scenarios switch to
    pub new_first_name: String,
    pub new_last_name: String,
    pub new_password: String,
    pub new_email: String,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            email: "user.mail.1@user.io".to_string(),
            password: "user_1_passwd".to_string(),
            first_name: "user".to_string(),
            last_name: "number1".to_string(),
            gender: "m".to_string(),
            new_first_name: "renamed".to_string(),
            new_last_name: "number2".to_string(),
            new_password: "user_1_new_passwd".to_string(),
            new_email: "user.mail.2@user.io".to_string(),
        }
    }
}

/// Where the service listens. Resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    /// Parse `host:port`, tolerating an `http://` prefix and a trailing slash
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let bare = trimmed
            .strip_prefix("http://")
            .unwrap_or(trimmed)
            .trim_end_matches('/');

        let (host, port) = bare
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidEndpoint(value.to_string()))?;
        if host.is_empty() {
            return Err(Error::InvalidEndpoint(value.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidEndpoint(value.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Base URL for HTTP requests
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Variables handed to the service on top of the inherited environment:
    /// env file first, then `[service.env]`
    pub fn service_env(&self) -> Result<BTreeMap<String, String>> {
        let mut vars = BTreeMap::new();

        if let Some(env_file) = &self.service.env_file {
            let path = paths::resolve(self.service.workdir.as_deref(), env_file);
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
                for (name, value) in parse_env_file(&content)? {
                    tracing::debug!(%name, "Setting variable from env file");
                    vars.insert(name, value);
                }
            } else {
                tracing::debug!(path = %path.display(), "No env file, skipping");
            }
        }

        vars.extend(
            self.service
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(vars)
    }

    /// Resolve the service endpoint from the service variables, falling back
    /// to the harness's own environment
    pub fn endpoint(&self, service_env: &BTreeMap<String, String>) -> Result<ServiceEndpoint> {
        let var = &self.service.endpoint_var;
        let value = match service_env.get(var) {
            Some(value) => value.clone(),
            None => std::env::var(var).map_err(|_| {
                Error::Config(format!(
                    "'{}' is not set in the env file, [service.env] or the environment",
                    var
                ))
            })?,
        };
        ServiceEndpoint::parse(&value)
    }

    /// Absolute (or workdir-relative) path of the service's store
    pub fn store_path(&self) -> PathBuf {
        paths::resolve(self.service.workdir.as_deref(), &self.service.store_path)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.startup_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_secs)
    }
}

/// Parse env file content. Each non-blank, non-comment line is `NAME value`
/// or `NAME=value`.
pub fn parse_env_file(content: &str) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let split = line
            .split_once('=')
            .filter(|(name, _)| !name.contains(char::is_whitespace))
            .or_else(|| line.split_once(char::is_whitespace));

        match split {
            Some((name, value)) if !name.trim().is_empty() => {
                vars.push((name.trim().to_string(), value.trim().to_string()));
            }
            _ => {
                return Err(Error::ConfigParse(format!(
                    "env file line {}: expected 'NAME value', got '{}'",
                    index + 1,
                    line
                )));
            }
        }
    }

    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file_both_forms() {
        let content = "\
# backend settings
BACKEND_URL 127.0.0.1:8000

BACKEND_SECRET=hunter2
BACKEND_RESET_DB 1
";
        let vars = parse_env_file(content).unwrap();
        assert_eq!(
            vars,
            vec![
                ("BACKEND_URL".to_string(), "127.0.0.1:8000".to_string()),
                ("BACKEND_SECRET".to_string(), "hunter2".to_string()),
                ("BACKEND_RESET_DB".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_env_file_value_with_equals_after_space() {
        let vars = parse_env_file("DATABASE_URL sqlite://db.sqlite?mode=rwc").unwrap();
        assert_eq!(vars[0].0, "DATABASE_URL");
        assert_eq!(vars[0].1, "sqlite://db.sqlite?mode=rwc");
    }

    #[test]
    fn test_parse_env_file_rejects_bare_name() {
        assert!(matches!(
            parse_env_file("JUST_A_NAME"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_endpoint_parse() {
        let endpoint = ServiceEndpoint::parse("127.0.0.1:8000").unwrap();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 8000);
        assert_eq!(endpoint.base_url(), "http://127.0.0.1:8000");

        let endpoint = ServiceEndpoint::parse("http://localhost:9000/").unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 9000);

        assert!(ServiceEndpoint::parse("localhost").is_err());
        assert!(ServiceEndpoint::parse(":8000").is_err());
        assert!(ServiceEndpoint::parse("localhost:http").is_err());
    }

    #[test]
    fn test_endpoint_prefers_service_env() {
        let mut config = Config::default();
        config.service.endpoint_var = "AUTH_E2E_TEST_ENDPOINT_UNSET".to_string();

        let mut vars = BTreeMap::new();
        vars.insert(
            "AUTH_E2E_TEST_ENDPOINT_UNSET".to_string(),
            "127.0.0.1:4242".to_string(),
        );
        let endpoint = config.endpoint(&vars).unwrap();
        assert_eq!(endpoint.port, 4242);

        assert!(matches!(
            config.endpoint(&BTreeMap::new()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_toml_defaults_and_overrides() {
        let config: Config = toml::from_str(
            r#"
[service]
program = "target/debug/backend"
args = []
store_path = "state/db.sqlite"
workdir = "/srv/backend"

[service.env]
BACKEND_URL = "127.0.0.1:8123"

[timeouts]
startup_secs = 5

[store.verification]
table = "pending_verifications"
key_column = "account_id"
token_column = "token"

[account]
email = "a@b.io"
password = "p"
first_name = "A"
last_name = "B"
"#,
        )
        .unwrap();

        assert_eq!(config.service.program, "target/debug/backend");
        assert!(config.service.args.is_empty());
        assert!(config.service.fresh_store);
        assert_eq!(config.store_path(), PathBuf::from("/srv/backend/state/db.sqlite"));
        assert_eq!(config.timeouts.startup_secs, 5);
        assert_eq!(config.timeouts.poll_interval_ms, 100);
        assert_eq!(config.store.verification.table, "pending_verifications");
        assert_eq!(config.store.password_reset.table, "password_resets");
        assert_eq!(config.account.email, "a@b.io");
        assert_eq!(config.account.gender, "m");
        assert_eq!(config.account.new_email, "user.mail.2@user.io");

        let vars = config.service_env().unwrap();
        assert_eq!(config.endpoint(&vars).unwrap().port, 8123);
    }

    #[test]
    fn test_service_env_reads_env_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "BACKEND_URL 127.0.0.1:7000\nBACKEND_SECRET abc\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.service.workdir = Some(dir.path().to_path_buf());
        config
            .service
            .env
            .insert("BACKEND_SECRET".to_string(), "override".to_string());

        let vars = config.service_env().unwrap();
        assert_eq!(vars["BACKEND_URL"], "127.0.0.1:7000");
        assert_eq!(vars["BACKEND_SECRET"], "override");
    }
}
