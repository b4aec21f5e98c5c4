//! Readiness probing
//!
//! A service is ready once its port accepts a TCP connection. Attempts are
//! spaced by a fixed sleep and the whole wait is bounded; a service that never
//! comes up fails with [`Error::StartupTimeout`] instead of hanging the run.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::common::config::{ServiceEndpoint, Timeouts};
use crate::common::{Error, Result};

/// Bounds for one readiness wait
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Give up after this long
    pub timeout: Duration,
    /// Sleep between attempts
    pub interval: Duration,
    /// Bound on a single connect attempt
    pub attempt_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&Timeouts> for ProbeOptions {
    fn from(t: &Timeouts) -> Self {
        Self {
            timeout: Duration::from_secs(t.startup_secs),
            interval: Duration::from_millis(t.poll_interval_ms),
            attempt_timeout: Duration::from_millis(t.connect_attempt_ms),
        }
    }
}

/// Block until `endpoint` accepts a connection
pub async fn wait_ready(endpoint: &ServiceEndpoint, opts: &ProbeOptions) -> Result<()> {
    wait_ready_while(endpoint, opts, || Ok(())).await
}

/// Like [`wait_ready`], but calls `alive` before every attempt so the caller
/// can abort early, e.g. when the service process has already exited
pub async fn wait_ready_while<F>(
    endpoint: &ServiceEndpoint,
    opts: &ProbeOptions,
    mut alive: F,
) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        alive()?;
        attempts += 1;

        if try_connect(endpoint, opts.attempt_timeout).await {
            tracing::debug!(
                %endpoint,
                attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Service is accepting connections"
            );
            return Ok(());
        }

        if attempts == 1 {
            tracing::info!(%endpoint, "Waiting for service to start...");
        }

        if start.elapsed() >= opts.timeout {
            return Err(Error::StartupTimeout {
                endpoint: endpoint.to_string(),
                secs: opts.timeout.as_secs(),
            });
        }

        sleep(opts.interval).await;
    }
}

/// Block until `endpoint` stops accepting connections. Used after teardown so
/// the next instance does not race the previous one for the port.
pub async fn wait_released(endpoint: &ServiceEndpoint, opts: &ProbeOptions) -> Result<()> {
    let start = Instant::now();

    while try_connect(endpoint, opts.attempt_timeout).await {
        if start.elapsed() >= opts.timeout {
            return Err(Error::Internal(format!(
                "{} still accepting connections {} seconds after teardown",
                endpoint,
                opts.timeout.as_secs()
            )));
        }
        sleep(opts.interval).await;
    }

    Ok(())
}

/// One connection attempt; the stream is dropped immediately
async fn try_connect(endpoint: &ServiceEndpoint, attempt_timeout: Duration) -> bool {
    let addr = (endpoint.host.as_str(), endpoint.port);
    matches!(timeout(attempt_timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
}
