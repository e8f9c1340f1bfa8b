use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::launcher::Launcher;
use crate::locks::UserLocks;
use crate::output::{OutputFormatter, Rendered, describe_outcome};
use crate::pathguard;
use crate::reaper::ExpiryReaper;
use crate::registry::{Sandbox, SandboxRegistry};
use crate::types::{DirEntry, DirPage, Health, InstallUpdate, SandboxStatus};
use crate::validate;

/// A completed run: the raw outcome plus its rendering decision.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: crate::types::ExecOutcome,
    pub rendered: Rendered,
}

/// Front-end-facing facade over the sandbox lifecycle: owns the
/// registry and the per-user lock map, and dispatches execution-class
/// operations to the launcher. One instance lives for the whole
/// process and is shared behind an `Arc` by the adapter layer.
pub struct SandboxService {
    config: EngineConfig,
    registry: Arc<SandboxRegistry>,
    locks: Arc<UserLocks>,
    launcher: Arc<dyn Launcher>,
    formatter: OutputFormatter,
}

impl SandboxService {
    pub fn new(config: EngineConfig, launcher: Arc<dyn Launcher>) -> Self {
        let registry = Arc::new(SandboxRegistry::new(config.base_dir.clone()));
        let formatter = OutputFormatter::new(config.inline_limit, config.preview_len);
        Self {
            registry,
            locks: Arc::new(UserLocks::new()),
            launcher,
            formatter,
            config,
        }
    }

    /// Build the background reaper for this service's registry.
    pub fn reaper(&self) -> ExpiryReaper {
        ExpiryReaper::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.locks),
            self.config.retention,
            self.config.reap_interval,
        )
    }

    pub async fn create(&self, user_id: u64) -> Result<Sandbox> {
        let sandbox = self.registry.create(user_id).await?;
        info!(user = user_id, root = %sandbox.root.display(), "sandbox created");
        Ok(sandbox)
    }

    /// Delete takes the same exclusivity key as execution operations,
    /// so it cannot interleave with a run, an install, or file I/O
    /// (file operations hold the shared half).
    pub async fn delete(&self, user_id: u64) -> Result<()> {
        let _guard = self.locks.exclusive(user_id)?;
        self.registry.delete(user_id).await?;
        self.locks.remove(user_id);
        info!(user = user_id, "sandbox deleted");
        Ok(())
    }

    pub async fn run(&self, user_id: u64, code: &str) -> Result<RunReport> {
        let code = validate::code(code)?;
        // Lock before the registry read; a delete finishing in between
        // would otherwise hand back a root that no longer exists.
        let _guard = self.locks.exclusive(user_id)?;
        let sandbox = self.registry.get(user_id).await?;

        let outcome = self
            .launcher
            .run(
                &sandbox.root,
                &code,
                &self.config.limits,
                self.config.run_timeout,
            )
            .await?;
        self.registry.touch(user_id).await?;

        info!(
            user = user_id,
            exit_code = outcome.exit_code,
            timed_out = outcome.timed_out(),
            "run finished"
        );
        let rendered = self.formatter.render(&describe_outcome(&outcome));
        Ok(RunReport { outcome, rendered })
    }

    /// Start an install job. The exclusivity guard is held by a relay
    /// task until the terminal update has been forwarded, so a second
    /// execution-class request fails fast for the whole job duration.
    pub async fn install(
        &self,
        user_id: u64,
        packages: &[String],
    ) -> Result<mpsc::Receiver<InstallUpdate>> {
        validate::packages(packages)?;
        let guard = self.locks.exclusive(user_id)?;
        let sandbox = self.registry.get(user_id).await?;

        let mut inner = self
            .launcher
            .install(&sandbox.root, packages, &self.config.limits)
            .await?;

        let (tx, rx) = mpsc::channel(16);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let _guard = guard;
            while let Some(update) = inner.recv().await {
                let done = matches!(update, InstallUpdate::Done(_));
                let _ = tx.send(update).await;
                if done {
                    break;
                }
            }
            if let Err(e) = registry.touch(user_id).await {
                warn!(user = user_id, error = %e, "post-install touch failed");
            }
        });
        Ok(rx)
    }

    pub async fn list_directory(&self, user_id: u64, path: &str, page: usize) -> Result<DirPage> {
        let _guard = self.locks.shared(user_id).await;
        let sandbox = self.registry.get(user_id).await?;

        let dir = pathguard::resolve(&sandbox.root, path)?;
        let meta = tokio::fs::metadata(&dir).await?;
        if !meta.is_dir() {
            return Err(EngineError::InvalidRequest(format!(
                "not a directory: {path}"
            )));
        }

        let mut entries = Vec::new();
        let mut read = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: (!meta.is_dir()).then(|| meta.len()),
            });
        }
        // Directories first, then case-insensitive by name.
        entries.sort_by(|a, b| {
            (!a.is_dir, a.name.to_lowercase()).cmp(&(!b.is_dir, b.name.to_lowercase()))
        });

        let page_size = self.config.page_size.max(1);
        let total_pages = entries.len().div_ceil(page_size).max(1);
        let page = page.min(total_pages - 1);
        let entries: Vec<DirEntry> = entries
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect();

        let canon_root = sandbox.root.canonicalize()?;
        let rel = dir
            .strip_prefix(&canon_root)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());

        self.registry.touch(user_id).await?;
        Ok(DirPage {
            path: rel,
            page,
            total_pages,
            entries,
        })
    }

    /// Create or overwrite a file under the sandbox root. Returns the
    /// number of bytes written.
    pub async fn write_file(&self, user_id: u64, path: &str, content: &str) -> Result<u64> {
        validate::rel_path(path)?;
        let _guard = self.locks.shared(user_id).await;
        let sandbox = self.registry.get(user_id).await?;

        let target = pathguard::resolve(&sandbox.root, path)?;
        if let Ok(meta) = tokio::fs::metadata(&target).await
            && meta.is_dir()
        {
            return Err(EngineError::InvalidRequest(format!(
                "a directory exists at: {path}"
            )));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content.as_bytes()).await?;
        self.registry.touch(user_id).await?;
        Ok(content.len() as u64)
    }

    /// Remove a file or directory. Directories require `recursive`;
    /// without it the call fails with `NotEmpty`.
    pub async fn remove_entry(&self, user_id: u64, path: &str, recursive: bool) -> Result<()> {
        validate::rel_path(path)?;
        let _guard = self.locks.shared(user_id).await;
        let sandbox = self.registry.get(user_id).await?;

        let target = pathguard::resolve(&sandbox.root, path)?;
        if target == sandbox.root.canonicalize()? {
            return Err(EngineError::InvalidRequest(
                "cannot remove the sandbox root".into(),
            ));
        }

        // symlink_metadata: a symlink to a directory is unlinked, not
        // descended into.
        let meta = tokio::fs::symlink_metadata(&target).await?;
        if meta.is_dir() {
            if !recursive {
                return Err(EngineError::NotEmpty);
            }
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        self.registry.touch(user_id).await?;
        Ok(())
    }

    pub async fn status(&self, user_id: u64) -> Result<SandboxStatus> {
        let _guard = self.locks.shared(user_id).await;
        let sandbox = self.registry.get(user_id).await?;
        let size_bytes = self.registry.disk_usage(user_id).await?;
        Ok(SandboxStatus {
            user_id,
            root: sandbox.root,
            created_at: sandbox.created_at,
            last_used: sandbox.last_used,
            size_bytes,
        })
    }

    pub async fn health(&self) -> Health {
        self.launcher.health().await
    }
}
