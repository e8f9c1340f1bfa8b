use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::debug;

use crate::throttle::LogThrottler;
use crate::types::{InstallResult, InstallUpdate};

use super::{force_remove, kill_process_group};

/// Characters of log tail forwarded in each intermediate snapshot.
const LOG_TAIL_CHARS: usize = 1800;

/// Drive an in-flight install job: merge stdout/stderr line-by-line
/// into the append-only log, forward throttled tail snapshots, and
/// always finish with a terminal `Done` update. The task ends with job
/// termination, so no reader is leaked.
pub(super) async fn drive(
    mut child: Child,
    binary: String,
    name: String,
    tx: mpsc::Sender<InstallUpdate>,
    throttle_interval: Duration,
    ceiling: Duration,
) {
    let mut throttler = LogThrottler::new(throttle_interval);
    let mut log = String::new();
    let deadline = tokio::time::Instant::now() + ceiling;

    let mut out_lines = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut err_lines = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut timed_out = false;

    while out_lines.is_some() || err_lines.is_some() {
        let line = tokio::select! {
            l = next_line(&mut out_lines) => l,
            l = next_line(&mut err_lines) => l,
            _ = tokio::time::sleep_until(deadline) => {
                timed_out = true;
                break;
            }
        };
        let Some(line) = line else { continue };

        log.push_str(&line);
        log.push('\n');

        let now = std::time::Instant::now();
        if throttler.should_emit(now) {
            // Snapshots are disposable; a slow or gone receiver just
            // misses this one.
            if tx
                .try_send(InstallUpdate::Log(tail(&log, LOG_TAIL_CHARS)))
                .is_ok()
            {
                throttler.record(now);
            }
        }
    }

    let success = if timed_out {
        debug!(container = %name, "install hit the time ceiling, killing");
        kill_process_group(&child);
        let _ = child.wait().await;
        force_remove(&binary, &name).await;
        log.push_str("[install timed out]\n");
        false
    } else {
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(exit)) => exit.success(),
            Ok(Err(e)) => {
                log.push_str(&format!("[wait failed: {e}]\n"));
                false
            }
            Err(_) => {
                kill_process_group(&child);
                let _ = child.wait().await;
                force_remove(&binary, &name).await;
                log.push_str("[install timed out]\n");
                false
            }
        }
    };

    // Terminal update bypasses the throttle: the caller is never left
    // without the completion status.
    let _ = tx
        .send(InstallUpdate::Done(InstallResult { success, log }))
        .await;
}

/// Next line from an optional stream; the slot is cleared on EOF so the
/// caller's loop can finish. Pends forever on an already-cleared slot,
/// which `select!` handles by taking the other branch.
async fn next_line<R: AsyncRead + Unpin>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String> {
    match lines {
        Some(inner) => match inner.next_line().await {
            Ok(Some(line)) => Some(line),
            _ => {
                *lines = None;
                None
            }
        },
        None => std::future::pending().await,
    }
}

/// Last `max_chars` characters of the log, on a char boundary.
fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    s.chars().skip(count - max_chars).collect()
}
