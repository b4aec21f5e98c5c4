//! Service process lifecycle
//!
//! [`ServiceInstance`] owns one spawned service for one scenario. It is only
//! handed out once the port accepts connections, and it always kills and
//! reaps the process: explicitly through [`ServiceInstance::shutdown`], or on
//! drop for every early-return path.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::common::config::{Config, ServiceEndpoint};
use crate::common::{paths, Error, Result};

use super::probe::{self, ProbeOptions};

/// Everything needed to start an isolated service instance
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    /// Applied on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub endpoint: ServiceEndpoint,
    pub store_path: PathBuf,
    pub fresh_store: bool,
    pub capture_output: bool,
    pub probe: ProbeOptions,
    pub shutdown_grace: Duration,
    pub release_timeout: Duration,
}

impl LaunchSpec {
    /// Resolve the launch settings once for the whole run
    pub fn from_config(config: &Config) -> Result<Self> {
        let env = config.service_env()?;
        let endpoint = config.endpoint(&env)?;

        Ok(Self {
            program: resolve_program(&config.service.program)?,
            args: config.service.args.clone(),
            workdir: config.service.workdir.clone(),
            env,
            endpoint,
            store_path: config.store_path(),
            fresh_store: config.service.fresh_store,
            capture_output: config.service.capture_output,
            probe: ProbeOptions::from(&config.timeouts),
            shutdown_grace: Duration::from_millis(config.timeouts.shutdown_grace_ms),
            release_timeout: Duration::from_secs(config.timeouts.release_secs),
        })
    }
}

/// Bare program names are looked up in PATH; anything with a separator is
/// used as given
fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(program)
        .map_err(|_| Error::ServiceSpawn(format!("'{}' not found in PATH", program)))
}

/// A running service, reachable at its endpoint
pub struct ServiceInstance {
    child: Option<Child>,
    label: String,
    endpoint: ServiceEndpoint,
}

impl ServiceInstance {
    /// Spawn the service for `label` and wait until it accepts connections
    pub async fn launch(spec: &LaunchSpec, label: &str) -> Result<Self> {
        if spec.fresh_store {
            remove_store(&spec.store_path)?;
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null());

        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }

        let (stdout, stderr) = output_streams(spec.capture_output, label);
        cmd.stdout(stdout).stderr(stderr);

        // Own process group, so teardown also reaches grandchildren
        // (`cargo run` forks the actual server)
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            Error::ServiceSpawn(format!("{}: {}", spec.program.display(), e))
        })?;

        tracing::info!(
            label,
            pid = child.id(),
            program = %spec.program.display(),
            "Spawned service"
        );

        let mut instance = Self {
            child: Some(child),
            label: label.to_string(),
            endpoint: spec.endpoint.clone(),
        };

        if let Err(e) = instance.await_ready(&spec.probe).await {
            instance.terminate(Duration::ZERO).await;
            return Err(e);
        }

        Ok(instance)
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Terminate the service, reap it, and wait until its port is free
    pub async fn shutdown(mut self, spec: &LaunchSpec) -> Result<()> {
        self.terminate(spec.shutdown_grace).await;

        let release = ProbeOptions {
            timeout: spec.release_timeout,
            ..spec.probe
        };
        probe::wait_released(&self.endpoint, &release).await
    }

    async fn await_ready(&mut self, opts: &ProbeOptions) -> Result<()> {
        let endpoint = self.endpoint.clone();
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| Error::Internal("service already stopped".to_string()))?;

        probe::wait_ready_while(&endpoint, opts, || match child.try_wait() {
            Ok(Some(status)) => Err(Error::ServiceExited {
                code: status.code(),
            }),
            Ok(None) => Ok(()),
            Err(e) => Err(Error::Io(e)),
        })
        .await
    }

    async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        let mut child = self.child.take()?;
        let pid = child.id();

        #[cfg(unix)]
        {
            if !grace.is_zero() {
                signal_group(pid, libc::SIGTERM);
                let deadline = Instant::now() + grace;
                while Instant::now() < deadline {
                    if let Ok(Some(_)) = child.try_wait() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        #[cfg(not(unix))]
        let _ = (pid, grace);

        kill_and_reap(&mut child, &self.label)
    }
}

impl Drop for ServiceInstance {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&mut child, &self.label);
        }
    }
}

fn kill_and_reap(child: &mut Child, label: &str) -> Option<ExitStatus> {
    let pid = child.id();

    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGKILL);
    }

    // Already-exited children report an error here; wait() below still reaps
    let _ = child.kill();

    match child.wait() {
        Ok(status) => {
            tracing::info!(label, pid, %status, "Service stopped");
            Some(status)
        }
        Err(e) => {
            tracing::warn!(label, pid, "Failed to reap service: {}", e);
            None
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // Negative pid targets the group created with process_group(0)
    let result = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if result != 0 {
        tracing::trace!(pid, signal, "Process group already gone");
    }
}

/// Delete the store and its SQLite sidecar files
fn remove_store(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        targets.push(PathBuf::from(sidecar));
    }

    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => tracing::debug!(path = %target.display(), "Removed previous store"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

fn output_streams(capture: bool, label: &str) -> (Stdio, Stdio) {
    if capture {
        let opened = paths::ensure_log_dir()
            .ok()
            .flatten()
            .and_then(|_| paths::service_log_path(label))
            .map(|path| (File::create(&path), path));

        match opened {
            Some((Ok(file), path)) => match file.try_clone() {
                Ok(clone) => {
                    tracing::debug!(path = %path.display(), "Capturing service output");
                    return (Stdio::from(file), Stdio::from(clone));
                }
                Err(e) => tracing::warn!("Could not capture service output: {}", e),
            },
            Some((Err(e), path)) => {
                tracing::warn!(path = %path.display(), "Could not capture service output: {}", e)
            }
            None => tracing::warn!("No log directory; discarding service output"),
        }
    }
    (Stdio::null(), Stdio::null())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str], port: u16, store: PathBuf) -> LaunchSpec {
        LaunchSpec {
            program: resolve_program(program).unwrap(),
            args: args.iter().map(|s| s.to_string()).collect(),
            workdir: None,
            env: BTreeMap::new(),
            endpoint: ServiceEndpoint {
                host: "127.0.0.1".to_string(),
                port,
            },
            store_path: store,
            fresh_store: true,
            capture_output: false,
            probe: ProbeOptions {
                timeout: Duration::from_millis(500),
                interval: Duration::from_millis(20),
                attempt_timeout: Duration::from_millis(100),
            },
            shutdown_grace: Duration::ZERO,
            release_timeout: Duration::from_secs(1),
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn test_resolve_program() {
        assert!(resolve_program("sh").unwrap().is_absolute());
        assert_eq!(
            resolve_program("./target/debug/backend").unwrap(),
            PathBuf::from("./target/debug/backend")
        );
        assert!(matches!(
            resolve_program("definitely-not-a-real-program-xyz"),
            Err(Error::ServiceSpawn(_))
        ));
    }

    #[test]
    fn test_remove_store_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("db.sqlite");
        std::fs::write(&store, b"x").unwrap();
        std::fs::write(dir.path().join("db.sqlite-journal"), b"x").unwrap();

        remove_store(&store).unwrap();
        assert!(!store.exists());
        assert!(!dir.path().join("db.sqlite-journal").exists());

        // Nothing left to remove is fine
        remove_store(&store).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_before_ready_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec("sh", &["-c", "exit 3"], free_port(), dir.path().join("db"));

        let err = ServiceInstance::launch(&spec, "exits").await.err().unwrap();
        assert!(matches!(err, Error::ServiceExited { code: Some(3) }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_never_listening_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec("sleep", &["5"], free_port(), dir.path().join("db"));

        let start = Instant::now();
        let err = ServiceInstance::launch(&spec, "sleeps").await.err().unwrap();
        assert!(matches!(err, Error::StartupTimeout { .. }));
        // The sleeping child was killed rather than waited out
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec("sh", &[], free_port(), dir.path().join("db"));
        spec.program = dir.path().join("missing-binary");

        let err = ServiceInstance::launch(&spec, "missing").await.err().unwrap();
        assert!(matches!(err, Error::ServiceSpawn(_)));
    }
}
