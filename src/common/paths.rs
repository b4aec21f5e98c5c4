//! Configuration and log paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/auth-e2e/`, `~/.local/share/auth-e2e/logs/`
//! - macOS: `~/Library/Application Support/auth-e2e/`
//! - Windows: `%APPDATA%\auth-e2e\`

use std::io;
use std::path::{Path, PathBuf};

/// Name used for the config and data directories
const APP_NAME: &str = "auth-e2e";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Ensure the log directory exists
pub fn ensure_log_dir() -> io::Result<Option<PathBuf>> {
    if let Some(dir) = log_dir() {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    } else {
        Ok(None)
    }
}

/// Path of the captured stdout/stderr for one scenario's service process
pub fn service_log_path(label: &str) -> Option<PathBuf> {
    log_dir().map(|dir| dir.join(format!("service-{}.log", label)))
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}
