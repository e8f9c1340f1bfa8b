use std::path::PathBuf;
use std::time::Duration;

use crate::types::ResourceLimits;

pub const DEFAULT_IMAGE: &str = "python:3.11-alpine";
pub const DEFAULT_DOCKER_BINARY: &str = "docker";
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MEMORY_MB: u32 = 256;
pub const DEFAULT_CPUS: f64 = 1.0;
pub const DEFAULT_PIDS_LIMIT: u32 = 64;
pub const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 3600;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_THROTTLE_SECS: u64 = 3;
pub const DEFAULT_INLINE_LIMIT: usize = 1900;
pub const DEFAULT_PREVIEW_LEN: usize = 1500;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100_000;
pub const DEFAULT_TMPFS_SIZE_MB: u32 = 64;

/// Engine-wide configuration. Constructed once at startup and threaded
/// through every component; nothing reads the environment directly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one sandbox root per user id.
    pub base_dir: PathBuf,
    pub image: String,
    pub docker_binary: String,
    pub run_timeout: Duration,
    pub install_timeout: Duration,
    pub pull_timeout: Duration,
    pub limits: ResourceLimits,
    /// Sandboxes idle longer than this are reaped.
    pub retention: Duration,
    pub reap_interval: Duration,
    /// Minimum interval between install log updates.
    pub throttle_interval: Duration,
    /// Largest output (chars) delivered inline; above this the full
    /// output becomes an attachment with a truncated preview.
    pub inline_limit: usize,
    pub preview_len: usize,
    pub page_size: usize,
    /// Cap on captured stdout/stderr per stream.
    pub max_output_bytes: usize,
    pub tmpfs_size_mb: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./sandboxes"),
            image: DEFAULT_IMAGE.into(),
            docker_binary: DEFAULT_DOCKER_BINARY.into(),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            install_timeout: Duration::from_secs(DEFAULT_INSTALL_TIMEOUT_SECS),
            pull_timeout: Duration::from_secs(DEFAULT_PULL_TIMEOUT_SECS),
            limits: ResourceLimits {
                memory_mb: DEFAULT_MEMORY_MB,
                cpus: DEFAULT_CPUS,
                pids_limit: DEFAULT_PIDS_LIMIT,
            },
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            reap_interval: Duration::from_secs(DEFAULT_REAP_INTERVAL_SECS),
            throttle_interval: Duration::from_secs(DEFAULT_THROTTLE_SECS),
            inline_limit: DEFAULT_INLINE_LIMIT,
            preview_len: DEFAULT_PREVIEW_LEN,
            page_size: DEFAULT_PAGE_SIZE,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            tmpfs_size_mb: DEFAULT_TMPFS_SIZE_MB,
        }
    }
}
