use std::path::PathBuf;

/// Per-execution resource ceilings, applied to both runs and installs.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpus: f64,
    pub pids_limit: u32,
}

/// How an isolated execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The process exited on its own (exit code may still be nonzero).
    Completed,
    /// The wall-clock timeout fired; partial output was captured.
    TimedOut,
    /// The memory or process ceiling killed the container.
    ResourceExceeded,
}

/// Outcome of one isolated execution. A nonzero exit code from the
/// user's own code is a normal result, not an error.
#[derive(Debug)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub status: ExecStatus,
    /// Captured output was cut at the capture cap.
    pub truncated: bool,
}

impl ExecOutcome {
    pub fn timed_out(&self) -> bool {
        self.status == ExecStatus::TimedOut
    }
}

/// Terminal state of an install job.
#[derive(Debug)]
pub struct InstallResult {
    pub success: bool,
    pub log: String,
}

/// Incremental update from an in-flight install job.
///
/// `Log` carries a tail snapshot of the accumulated log (throttled);
/// `Done` is always delivered, bypassing the throttle.
#[derive(Debug)]
pub enum InstallUpdate {
    Log(String),
    Done(InstallResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    /// File size in bytes; `None` for directories.
    pub size: Option<u64>,
}

/// One page of a directory listing.
#[derive(Debug)]
pub struct DirPage {
    /// Path relative to the sandbox root ("." for the root itself).
    pub path: String,
    pub page: usize,
    pub total_pages: usize,
    pub entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct Health {
    pub runtime_reachable: bool,
    pub image_present: bool,
}

/// Sandbox metadata plus derived disk usage, for status reporting.
#[derive(Debug)]
pub struct SandboxStatus {
    pub user_id: u64,
    pub root: PathBuf,
    pub created_at: u64,
    pub last_used: u64,
    pub size_bytes: u64,
}
