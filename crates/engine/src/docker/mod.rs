mod install;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, trace};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::launcher::Launcher;
use crate::types::{ExecOutcome, ExecStatus, Health, InstallUpdate, ResourceLimits};

/// Fixed in-container mount point for the sandbox root.
pub const WORKSPACE_MOUNT: &str = "/workspace";
/// Install target under the root; `run` puts it on the Python search
/// path so installed packages are visible.
pub const SITE_PACKAGES: &str = "/workspace/.site-packages";

/// Timeout for `docker image inspect`.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit code Docker reports when the OOM killer (or pids ceiling) took
/// the container down with SIGKILL.
const SIGKILL_EXIT: i32 = 137;

/// Launches hardened Docker containers: no network for runs, all
/// capabilities dropped, no privilege escalation, non-root user,
/// memory/CPU/pids ceilings, read-only image filesystem with an
/// in-memory /tmp.
pub struct DockerLauncher {
    config: EngineConfig,
}

impl DockerLauncher {
    /// Fails with an infrastructure error if the Docker binary is not
    /// on PATH.
    pub fn new(config: EngineConfig) -> Result<Self> {
        which::which(&config.docker_binary).map_err(|_| {
            EngineError::Infrastructure(format!(
                "Docker binary '{}' not found; install Docker and ensure it is on PATH",
                config.docker_binary
            ))
        })?;
        Ok(Self { config })
    }

    /// Ensure the configured image exists locally, optionally pulling
    /// it. Called at startup (pre-pull) and by the health check; never
    /// retried automatically during a run.
    pub async fn ensure_image(&self, pull: bool) -> Result<()> {
        let image = &self.config.image;
        if self.image_present().await? {
            return Ok(());
        }
        if !pull {
            return Err(EngineError::Infrastructure(format!(
                "image '{image}' not present locally and pulling is disabled; pre-pull it first"
            )));
        }

        info!(image = %image, "pulling image");
        let pulled = tokio::time::timeout(
            self.config.pull_timeout,
            Command::new(&self.config.docker_binary)
                .args(["pull", image])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| {
            EngineError::Infrastructure(format!(
                "timed out pulling image '{image}'; try pulling manually"
            ))
        })?
        .map_err(|e| EngineError::Infrastructure(format!("failed to pull image '{image}': {e}")))?;

        if !pulled.status.success() {
            return Err(EngineError::Infrastructure(format!(
                "Docker failed to pull image '{image}'; check Docker connectivity"
            )));
        }
        Ok(())
    }

    /// `docker info` exits nonzero when the daemon is down even though
    /// the client binary runs fine.
    async fn daemon_reachable(&self) -> bool {
        let probed = tokio::time::timeout(
            INSPECT_TIMEOUT,
            Command::new(&self.config.docker_binary)
                .arg("info")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .output(),
        )
        .await;
        match probed {
            Ok(Ok(output)) => output.status.success(),
            _ => false,
        }
    }

    async fn image_present(&self) -> Result<bool> {
        let inspected = tokio::time::timeout(
            INSPECT_TIMEOUT,
            Command::new(&self.config.docker_binary)
                .args(["image", "inspect", &self.config.image])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| {
            EngineError::Infrastructure(format!(
                "timed out inspecting image '{}'",
                self.config.image
            ))
        })?
        .map_err(|e| {
            EngineError::Infrastructure(format!(
                "failed to inspect image '{}': {e}; is Docker running?",
                self.config.image
            ))
        })?;
        Ok(inspected.status.success())
    }
}

#[async_trait]
impl Launcher for DockerLauncher {
    async fn run(
        &self,
        workspace: &Path,
        code: &str,
        limits: &ResourceLimits,
        timeout: Duration,
    ) -> Result<ExecOutcome> {
        let name = container_name("py-sbx-");
        let args = run_args(&self.config, limits, &name, workspace);
        trace!(container = %name, "docker run");

        let mut child = Command::new(&self.config.docker_binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Infrastructure(format!(
                    "failed to launch '{}': {e}; is Docker installed and running?",
                    self.config.docker_binary
                ))
            })?;

        // Code travels over stdin (`python -`), never through argv.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let cap = self.config.max_output_bytes;
        let out_task = child
            .stdout
            .take()
            .map(|s| tokio::spawn(read_capped(s, cap)));
        let err_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(read_capped(s, cap)));

        let waited = tokio::select! {
            res = child.wait() => Some(res?),
            _ = tokio::time::sleep(timeout) => None,
        };

        let (exit_code, status) = match waited {
            Some(exit) => {
                let code = exit.code().unwrap_or(-1);
                let status = if code == SIGKILL_EXIT {
                    ExecStatus::ResourceExceeded
                } else {
                    ExecStatus::Completed
                };
                (code, status)
            }
            None => {
                // Kill the client and its descendants, then reap the
                // container itself; the two are separate processes.
                kill_process_group(&child);
                let _ = child.wait().await;
                force_remove(&self.config.docker_binary, &name).await;
                (124, ExecStatus::TimedOut)
            }
        };

        let (stdout, out_truncated) = match out_task {
            Some(t) => t.await.unwrap_or_default(),
            None => Default::default(),
        };
        let (stderr, err_truncated) = match err_task {
            Some(t) => t.await.unwrap_or_default(),
            None => Default::default(),
        };

        Ok(ExecOutcome {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status,
            truncated: out_truncated || err_truncated,
        })
    }

    async fn install(
        &self,
        workspace: &Path,
        packages: &[String],
        limits: &ResourceLimits,
    ) -> Result<mpsc::Receiver<InstallUpdate>> {
        let name = container_name("py-pip-");
        let args = install_args(&self.config, limits, &name, workspace, packages);
        trace!(container = %name, packages = packages.len(), "docker pip install");

        let child = Command::new(&self.config.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Infrastructure(format!(
                    "failed to launch '{}': {e}; is Docker installed and running?",
                    self.config.docker_binary
                ))
            })?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(install::drive(
            child,
            self.config.docker_binary.clone(),
            name,
            tx,
            self.config.throttle_interval,
            self.config.install_timeout,
        ));
        Ok(rx)
    }

    async fn health(&self) -> Health {
        // A present binary says nothing about the daemon; reachability
        // comes from a round-trip.
        let runtime_reachable = self.daemon_reachable().await;
        let image_present = runtime_reachable && self.image_present().await.unwrap_or(false);
        Health {
            runtime_reachable,
            image_present,
        }
    }
}

fn container_name(prefix: &str) -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    format!("{prefix}{id}")
}

/// Arguments for an isolated code run. Pure so the hardening flags are
/// unit-testable.
fn run_args(
    config: &EngineConfig,
    limits: &ResourceLimits,
    name: &str,
    workspace: &Path,
) -> Vec<String> {
    vec![
        "run".into(),
        "--rm".into(),
        "--name".into(),
        name.into(),
        // Keep stdin open to pass code to `python -`.
        "-i".into(),
        "--network".into(),
        "none".into(),
        "--read-only".into(),
        "--tmpfs".into(),
        format!("/tmp:rw,noexec,nosuid,size={}m", config.tmpfs_size_mb),
        "--pids-limit".into(),
        limits.pids_limit.to_string(),
        "--cpus".into(),
        limits.cpus.to_string(),
        "--memory".into(),
        format!("{}m", limits.memory_mb),
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "--user".into(),
        "1000:1000".into(),
        "-e".into(),
        "PYTHONDONTWRITEBYTECODE=1".into(),
        "-e".into(),
        "PYTHONUNBUFFERED=1".into(),
        "-e".into(),
        format!("PYTHONPATH={SITE_PACKAGES}"),
        "-v".into(),
        format!("{}:{WORKSPACE_MOUNT}:rw", workspace.display()),
        "-w".into(),
        WORKSPACE_MOUNT.into(),
        config.image.clone(),
        "python".into(),
        "-".into(),
    ]
}

/// Arguments for a package install. Network stays enabled (pip needs
/// the index) and writes land in the packages subdirectory; the same
/// CPU/memory/pids ceilings apply.
fn install_args(
    config: &EngineConfig,
    limits: &ResourceLimits,
    name: &str,
    workspace: &Path,
    packages: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "--name".into(),
        name.into(),
        "--pids-limit".into(),
        limits.pids_limit.to_string(),
        "--cpus".into(),
        limits.cpus.to_string(),
        "--memory".into(),
        format!("{}m", limits.memory_mb),
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "--user".into(),
        "1000:1000".into(),
        "-e".into(),
        "PYTHONDONTWRITEBYTECODE=1".into(),
        "-e".into(),
        "PYTHONUNBUFFERED=1".into(),
        "-v".into(),
        format!("{}:{WORKSPACE_MOUNT}:rw", workspace.display()),
        "-w".into(),
        WORKSPACE_MOUNT.into(),
        config.image.clone(),
        "python".into(),
        "-m".into(),
        "pip".into(),
        "install".into(),
        "--no-cache-dir".into(),
        "-U".into(),
        "-t".into(),
        SITE_PACKAGES.into(),
    ];
    args.extend(packages.iter().cloned());
    args
}

/// Kill the entire process group of `child` via `killpg(SIGKILL)`.
///
/// Requires the child to have been spawned with `process_group(0)` so
/// that its PGID equals its PID. No-op if the child already exited.
pub(crate) fn kill_process_group(child: &tokio::process::Child) {
    if let Some(pid) = child.id()
        && let Ok(pid) = i32::try_from(pid)
    {
        let pgid = nix::unistd::Pid::from_raw(pid);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

/// `docker rm -f <name>`, ignoring any errors. Used after a timeout
/// kill, where the container may outlive the CLI client.
pub(crate) async fn force_remove(binary: &str, name: &str) {
    let result = Command::new(binary)
        .args(["rm", "-f", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    match result {
        Ok(o) if !o.status.success() => {
            trace!(container = %name, "force remove failed (ignored)");
        }
        Err(e) => {
            trace!(container = %name, error = %e, "force remove failed to spawn (ignored)");
        }
        _ => {}
    }
}

/// Read a stream to the end, keeping at most `cap` bytes and flagging
/// whether anything was dropped.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (Vec<u8>, bool) {
    let mut buf = vec![0u8; 8192];
    let mut out = Vec::new();
    let mut truncated = false;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(out.len());
                let take = room.min(n);
                if let Some(chunk) = buf.get(..take) {
                    out.extend_from_slice(chunk);
                }
                if take < n {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (out, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn limits() -> ResourceLimits {
        config().limits
    }

    #[test]
    fn run_args_harden_the_container() {
        let args = run_args(&config(), &limits(), "py-sbx-abc", &PathBuf::from("/data/42"));
        let joined = args.join(" ");

        assert!(joined.contains("--network none"));
        assert!(joined.contains("--read-only"));
        assert!(joined.contains("--tmpfs /tmp:rw,noexec,nosuid,size=64m"));
        assert!(joined.contains("--pids-limit 64"));
        assert!(joined.contains("--cpus 1"));
        assert!(joined.contains("--memory 256m"));
        assert!(joined.contains("--cap-drop ALL"));
        assert!(joined.contains("--security-opt no-new-privileges"));
        assert!(joined.contains("--user 1000:1000"));
        assert!(joined.contains("-v /data/42:/workspace:rw"));
        assert!(joined.contains("-w /workspace"));
        assert!(joined.ends_with("python:3.11-alpine python -"));
    }

    #[test]
    fn run_args_expose_installed_packages() {
        let args = run_args(&config(), &limits(), "n", &PathBuf::from("/data/1"));
        assert!(args.contains(&format!("PYTHONPATH={SITE_PACKAGES}")));
    }

    #[test]
    fn install_args_allow_network_and_target_site_packages() {
        let pkgs = vec!["requests".to_string(), "numpy==1.26".to_string()];
        let args = install_args(&config(), &limits(), "py-pip-abc", &PathBuf::from("/data/42"), &pkgs);
        let joined = args.join(" ");

        assert!(!joined.contains("--network none"));
        assert!(!joined.contains("--read-only"));
        assert!(joined.contains("--pids-limit 64"));
        assert!(joined.contains("--cap-drop ALL"));
        assert!(joined.contains(&format!(
            "pip install --no-cache-dir -U -t {SITE_PACKAGES} requests numpy==1.26"
        )));
    }

    #[test]
    fn container_names_are_prefixed_and_short() {
        let name = container_name("py-sbx-");
        assert!(name.starts_with("py-sbx-"));
        assert_eq!(name.len(), "py-sbx-".len() + 12);
    }

    #[tokio::test]
    async fn health_reports_dead_daemon_as_unreachable() {
        let mut config = config();
        // Stand-in client whose every invocation fails, like a Docker
        // client with no daemon behind it.
        config.docker_binary = "false".into();
        let launcher = DockerLauncher::new(config).unwrap();

        let health = launcher.health().await;
        assert!(!health.runtime_reachable);
        assert!(!health.image_present);
    }

    #[tokio::test]
    async fn health_reports_live_daemon_and_image() {
        let mut config = config();
        // Stand-in client whose every invocation succeeds.
        config.docker_binary = "true".into();
        let launcher = DockerLauncher::new(config).unwrap();

        let health = launcher.health().await;
        assert!(health.runtime_reachable);
        assert!(health.image_present);
    }

    #[tokio::test]
    async fn read_capped_keeps_everything_under_cap() {
        let data: &[u8] = b"hello world";
        let (out, truncated) = read_capped(data, 100).await;
        assert_eq!(out, data);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn read_capped_cuts_at_cap() {
        let data: &[u8] = b"0123456789";
        let (out, truncated) = read_capped(data, 4).await;
        assert_eq!(out, b"0123");
        assert!(truncated);
    }
}
