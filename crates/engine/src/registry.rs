use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{EngineError, Result};

/// Current unix time in whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One user's persistent sandbox record.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub user_id: u64,
    pub root: PathBuf,
    pub created_at: u64,
    pub last_used: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    created_at: u64,
    last_used: u64,
}

/// On-disk record of known sandboxes: one root directory per user id
/// under `base_dir`, with metadata stored *beside* the root
/// (`<base>/<uid>.meta.json`) so user writes and container mounts can
/// never clobber it. Metadata writes go to a temp file, fsync, then
/// rename into place.
pub struct SandboxRegistry {
    base_dir: PathBuf,
}

impl SandboxRegistry {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn root_dir(&self, user_id: u64) -> PathBuf {
        self.base_dir.join(user_id.to_string())
    }

    fn meta_path(&self, user_id: u64) -> PathBuf {
        self.base_dir.join(format!("{user_id}.meta.json"))
    }

    // Write-fsync-rename so a crash mid-write can never leave a
    // truncated record where a valid one used to be.
    async fn write_meta(&self, user_id: u64, meta: &Meta) -> Result<()> {
        let bytes = serde_json::to_vec(meta)?;
        let tmp = self.base_dir.join(format!("{user_id}.meta.json.tmp"));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, self.meta_path(user_id)).await?;
        Ok(())
    }

    async fn read_meta(&self, user_id: u64) -> Result<Meta> {
        let bytes = match tokio::fs::read(self.meta_path(user_id)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Create a sandbox for `user_id`. Exactly one sandbox per user:
    /// fails with `AlreadyExists` when both the root directory and its
    /// metadata are present. A bare root without metadata (leftover
    /// from an interrupted delete or a stray write) is adopted rather
    /// than left to block the user forever; stale metadata without a
    /// root is simply overwritten.
    pub async fn create(&self, user_id: u64) -> Result<Sandbox> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let root = self.root_dir(user_id);
        if tokio::fs::try_exists(&root).await?
            && tokio::fs::try_exists(self.meta_path(user_id)).await?
        {
            return Err(EngineError::AlreadyExists);
        }

        tokio::fs::create_dir_all(&root).await?;
        let now = unix_now();
        let meta = Meta {
            created_at: now,
            last_used: now,
        };
        self.write_meta(user_id, &meta).await?;

        Ok(Sandbox {
            user_id,
            root,
            created_at: now,
            last_used: now,
        })
    }

    pub async fn get(&self, user_id: u64) -> Result<Sandbox> {
        let meta = self.read_meta(user_id).await?;
        let root = self.root_dir(user_id);
        if !tokio::fs::try_exists(&root).await? {
            // Stale metadata without a root directory: clean it up so a
            // later create() is not blocked.
            if let Err(e) = tokio::fs::remove_file(self.meta_path(user_id)).await {
                warn!(user = user_id, error = %e, "failed to remove stale metadata");
            }
            return Err(EngineError::NotFound);
        }
        Ok(Sandbox {
            user_id,
            root,
            created_at: meta.created_at,
            last_used: meta.last_used,
        })
    }

    /// Update last-activity to now. Called after every successful
    /// operation on the sandbox.
    pub async fn touch(&self, user_id: u64) -> Result<()> {
        let mut meta = self.read_meta(user_id).await?;
        meta.last_used = unix_now();
        self.write_meta(user_id, &meta).await
    }

    /// Remove the root directory and the registry record. Fails with
    /// `NotFound` if neither exists.
    pub async fn delete(&self, user_id: u64) -> Result<()> {
        let root = self.root_dir(user_id);
        let meta = self.meta_path(user_id);
        let had_root = tokio::fs::try_exists(&root).await?;
        let had_meta = tokio::fs::try_exists(&meta).await?;
        if !had_root && !had_meta {
            return Err(EngineError::NotFound);
        }

        // Root first: a crash in between leaves metadata without a root,
        // which get() detects and cleans.
        if had_root {
            tokio::fs::remove_dir_all(&root).await?;
        }
        if had_meta {
            tokio::fs::remove_file(&meta).await?;
        }
        Ok(())
    }

    /// User ids whose sandboxes are past the retention window:
    /// expired iff `now >= last_used + retention_secs`. Metadata that
    /// cannot be parsed counts as expired so broken sandboxes still get
    /// reaped eventually.
    pub async fn list_expired(&self, now: u64, retention_secs: u64) -> Result<Vec<u64>> {
        let mut expired = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(expired),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(uid) = name
                .strip_suffix(".meta.json")
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };

            match self.read_meta(uid).await {
                Ok(meta) => {
                    if now.saturating_sub(meta.last_used) >= retention_secs {
                        expired.push(uid);
                    }
                }
                Err(e) => {
                    warn!(user = uid, error = %e, "unreadable metadata, marking expired");
                    expired.push(uid);
                }
            }
        }
        Ok(expired)
    }

    /// Approximate on-disk size of a sandbox: sum of file sizes under
    /// the root.
    pub async fn disk_usage(&self, user_id: u64) -> Result<u64> {
        let root = self.root_dir(user_id);
        if !tokio::fs::try_exists(&root).await? {
            return Err(EngineError::NotFound);
        }

        let mut total = 0u64;
        let mut stack = vec![root];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    stack.push(entry.path());
                } else {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}
