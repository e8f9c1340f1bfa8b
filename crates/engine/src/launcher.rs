use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{ExecOutcome, Health, InstallUpdate, ResourceLimits};

/// Backend that spawns isolated executions against a sandbox root.
///
/// Constructed once at startup and passed through the service; tests
/// substitute a fake so the lifecycle layer can be exercised without a
/// container runtime.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run a code payload with the sandbox root mounted read-write and
    /// network disabled. A nonzero exit from the user's code is a
    /// normal outcome; `Err` means the runtime itself failed.
    async fn run(
        &self,
        workspace: &Path,
        code: &str,
        limits: &ResourceLimits,
        timeout: Duration,
    ) -> Result<ExecOutcome>;

    /// Start a package install job (network enabled, writes confined
    /// to the packages subdirectory). Updates arrive on the returned
    /// channel; the terminal `InstallUpdate::Done` is always sent.
    async fn install(
        &self,
        workspace: &Path,
        packages: &[String],
        limits: &ResourceLimits,
    ) -> Result<mpsc::Receiver<InstallUpdate>>;

    async fn health(&self) -> Health;
}
