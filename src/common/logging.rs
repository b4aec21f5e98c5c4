//! Logging and tracing configuration
//!
//! Diagnostics go to stderr and, when the log directory is writable, to
//! `harness.log` next to the captured service output. Scenario results are
//! printed to stdout by the orchestrator, not through tracing.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `verbose`), WARN for dependencies.
///
/// Returns the harness log file path when file logging could be set up.
pub fn init_cli(verbose: bool) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("auth_e2e=debug,info")
        } else {
            EnvFilter::new("auth_e2e=info,warn")
        }
    });

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let log_file = match paths::ensure_log_dir() {
        Ok(Some(dir)) => {
            let path = dir.join("harness.log");
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(file) => Some((path, file)),
                Err(e) => {
                    eprintln!("Warning: Could not open log file: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    match log_file {
        Some((path, file)) => {
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            Some(path)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
