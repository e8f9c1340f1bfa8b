use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use engine::config::{
    DEFAULT_CPUS, DEFAULT_DOCKER_BINARY, DEFAULT_IMAGE, DEFAULT_INSTALL_TIMEOUT_SECS,
    DEFAULT_MEMORY_MB, DEFAULT_PIDS_LIMIT, DEFAULT_RETENTION_SECS, DEFAULT_RUN_TIMEOUT_SECS,
};
use engine::{
    DockerLauncher, EngineConfig, InstallUpdate, Rendered, ResourceLimits, SandboxService,
};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Engine configuration, settable per flag or via SANDBOX_* environment
/// variables.
#[derive(Args)]
struct ConfigArgs {
    /// Directory holding per-user sandbox roots
    #[arg(long, env = "SANDBOX_BASE_DIR", default_value = "./sandboxes")]
    base_dir: PathBuf,
    #[arg(long, env = "SANDBOX_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,
    #[arg(long, env = "SANDBOX_DOCKER_BINARY", default_value = DEFAULT_DOCKER_BINARY)]
    docker_binary: String,
    /// Wall-clock timeout for a single run, in seconds
    #[arg(long, env = "SANDBOX_TIMEOUT_SECS", default_value_t = DEFAULT_RUN_TIMEOUT_SECS)]
    timeout_secs: u64,
    /// Ceiling for an install job, in seconds
    #[arg(long, env = "SANDBOX_INSTALL_TIMEOUT_SECS", default_value_t = DEFAULT_INSTALL_TIMEOUT_SECS)]
    install_timeout_secs: u64,
    #[arg(long, env = "SANDBOX_MEMORY_MB", default_value_t = DEFAULT_MEMORY_MB)]
    memory_mb: u32,
    #[arg(long, env = "SANDBOX_CPUS", default_value_t = DEFAULT_CPUS)]
    cpus: f64,
    #[arg(long, env = "SANDBOX_PIDS_LIMIT", default_value_t = DEFAULT_PIDS_LIMIT)]
    pids_limit: u32,
    /// Idle time after which a sandbox is reaped, in seconds
    #[arg(long, env = "SANDBOX_RETENTION_SECS", default_value_t = DEFAULT_RETENTION_SECS)]
    retention_secs: u64,
}

impl ConfigArgs {
    fn into_config(self) -> EngineConfig {
        EngineConfig {
            base_dir: self.base_dir,
            image: self.image,
            docker_binary: self.docker_binary,
            run_timeout: Duration::from_secs(self.timeout_secs),
            install_timeout: Duration::from_secs(self.install_timeout_secs),
            limits: ResourceLimits {
                memory_mb: self.memory_mb,
                cpus: self.cpus,
                pids_limit: self.pids_limit,
            },
            retention: Duration::from_secs(self.retention_secs),
            ..EngineConfig::default()
        }
    }
}

#[derive(Parser)]
#[command(name = "sandboxd", version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a sandbox for a user (one per user)
    Create { user: u64 },
    /// Delete a user's sandbox and all its files
    Delete { user: u64 },
    /// Run a code snippet in a user's sandbox
    Run { user: u64, code: String },
    /// List a directory inside a user's sandbox
    Ls {
        user: u64,
        #[arg(default_value = "")]
        path: String,
        #[arg(long, default_value_t = 0)]
        page: usize,
    },
    /// Create or overwrite a file
    Write {
        user: u64,
        path: String,
        content: String,
    },
    /// Remove a file or directory
    Rm {
        user: u64,
        path: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Install packages into a user's sandbox
    Pip {
        user: u64,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Show sandbox metadata and disk usage
    Status { user: u64 },
    /// Check runtime reachability and image presence
    Health,
    /// Pre-pull the sandbox image (avoids first-run timeout races)
    Pull,
    /// Run one expiry sweep, deleting sandboxes past retention
    Reap,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .init();

    let cli = Cli::parse();
    match dispatch(cli.config.into_config(), cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(config: EngineConfig, command: Command) -> engine::Result<()> {
    let launcher = DockerLauncher::new(config.clone())?;
    if let Command::Pull = command {
        launcher.ensure_image(true).await?;
        println!("image ready: {}", config.image);
        return Ok(());
    }

    let service = SandboxService::new(config, Arc::new(launcher));
    match command {
        Command::Pull => {}
        Command::Create { user } => {
            let sandbox = service.create(user).await?;
            println!("sandbox created at {}", sandbox.root.display());
        }
        Command::Delete { user } => {
            service.delete(user).await?;
            println!("sandbox deleted");
        }
        Command::Run { user, code } => {
            let report = service.run(user, &code).await?;
            match report.rendered {
                Rendered::Inline(text) => println!("{text}"),
                Rendered::Attachment {
                    preview,
                    bytes,
                    note,
                } => {
                    println!("{preview}");
                    tokio::fs::write("output.txt", &bytes).await?;
                    println!("{note} (written to output.txt)");
                }
            }
        }
        Command::Ls { user, path, page } => {
            let listing = service.list_directory(user, &path, page).await?;
            let cwd = if listing.path == "." {
                ""
            } else {
                listing.path.as_str()
            };
            println!("cwd: /{cwd}");
            println!("Page {}/{}", listing.page + 1, listing.total_pages);
            for entry in &listing.entries {
                match entry.size {
                    Some(size) => println!("{} ({size} B)", entry.name),
                    None => println!("{}/", entry.name),
                }
            }
        }
        Command::Write {
            user,
            path,
            content,
        } => {
            let bytes = service.write_file(user, &path, &content).await?;
            println!("wrote {path} ({bytes} bytes)");
        }
        Command::Rm {
            user,
            path,
            recursive,
        } => {
            service.remove_entry(user, &path, recursive).await?;
            println!("removed");
        }
        Command::Pip { user, packages } => {
            let mut updates = service.install(user, &packages).await?;
            while let Some(update) = updates.recv().await {
                match update {
                    InstallUpdate::Log(snapshot) => println!("{snapshot}"),
                    InstallUpdate::Done(result) => {
                        if result.success {
                            println!("install succeeded");
                        } else {
                            println!("install failed:\n{}", result.log);
                        }
                        break;
                    }
                }
            }
        }
        Command::Status { user } => {
            let status = service.status(user).await?;
            println!("root:       {}", status.root.display());
            println!("created_at: {}", status.created_at);
            println!("last_used:  {}", status.last_used);
            println!("size:       {} B", status.size_bytes);
        }
        Command::Health => {
            let health = service.health().await;
            println!("runtime reachable: {}", health.runtime_reachable);
            println!("image present:     {}", health.image_present);
        }
        Command::Reap => {
            let reaped = service.reaper().sweep().await;
            println!("reaped {reaped} sandbox(es)");
        }
    }
    Ok(())
}
