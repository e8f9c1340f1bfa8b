pub mod config;
mod docker;
mod error;
mod launcher;
mod locks;
mod output;
mod pathguard;
mod reaper;
mod registry;
mod service;
mod throttle;
mod types;
mod validate;

pub use config::EngineConfig;
pub use docker::DockerLauncher;
pub use error::{EngineError, Result};
pub use launcher::Launcher;
pub use output::{OutputFormatter, Rendered, describe_outcome};
pub use reaper::ExpiryReaper;
pub use registry::{Sandbox, SandboxRegistry, unix_now};
pub use service::{RunReport, SandboxService};
pub use throttle::LogThrottler;
pub use types::{
    DirEntry, DirPage, ExecOutcome, ExecStatus, Health, InstallResult, InstallUpdate,
    ResourceLimits, SandboxStatus,
};
