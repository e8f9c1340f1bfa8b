use crate::types::{ExecOutcome, ExecStatus};

/// How a completed execution's output should be delivered.
#[derive(Debug)]
pub enum Rendered {
    /// Fits inline, delivered verbatim.
    Inline(String),
    /// Too large for an inline message: a truncated preview plus the
    /// full raw output as an attachable blob. Only the preview is
    /// lossy.
    Attachment {
        preview: String,
        bytes: Vec<u8>,
        note: String,
    },
}

pub struct OutputFormatter {
    inline_limit: usize,
    preview_len: usize,
}

impl OutputFormatter {
    pub fn new(inline_limit: usize, preview_len: usize) -> Self {
        Self {
            inline_limit,
            preview_len,
        }
    }

    pub fn render(&self, raw: &str) -> Rendered {
        if raw.chars().count() <= self.inline_limit {
            return Rendered::Inline(raw.to_string());
        }
        Rendered::Attachment {
            preview: truncate_chars(raw, self.preview_len),
            bytes: raw.as_bytes().to_vec(),
            note: "Output too long, full output attached.".to_string(),
        }
    }
}

/// Assemble the best-effort textual result for an execution: stdout,
/// stderr, and a status line for timeouts, resource kills, and capped
/// capture.
pub fn describe_outcome(outcome: &ExecOutcome) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !outcome.stdout.is_empty() {
        parts.push(outcome.stdout.clone());
    }
    if !outcome.stderr.is_empty() {
        if outcome.stdout.is_empty() {
            parts.push(outcome.stderr.clone());
        } else {
            parts.push(format!("\n--- stderr ---\n{}", outcome.stderr));
        }
    }
    if outcome.stdout.is_empty() && outcome.stderr.is_empty() {
        parts.push(format!("(no output, exit code {})", outcome.exit_code));
    }
    if outcome.truncated {
        parts.push("\n[output truncated]".to_string());
    }
    match outcome.status {
        ExecStatus::Completed => {}
        ExecStatus::TimedOut => {
            parts.push(
                "\n[execution timed out; if this was the first run, the image may still be pulling]"
                    .to_string(),
            );
        }
        ExecStatus::ResourceExceeded => {
            parts.push("\n[killed: memory or process limit exceeded]".to_string());
        }
    }
    parts.concat()
}

/// Cut a string to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s.get(..idx).unwrap_or_default().to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stdout: &str, stderr: &str, exit_code: i32) -> ExecOutcome {
        ExecOutcome {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            status: ExecStatus::Completed,
            truncated: false,
        }
    }

    #[test]
    fn under_limit_is_inline_verbatim() {
        let formatter = OutputFormatter::new(100, 50);
        let raw = "x".repeat(100);
        match formatter.render(&raw) {
            Rendered::Inline(text) => assert_eq!(text, raw),
            other => panic!("expected inline, got {other:?}"),
        }
    }

    #[test]
    fn over_limit_becomes_attachment_with_exact_bytes() {
        let formatter = OutputFormatter::new(100, 50);
        let raw = "y".repeat(101);
        match formatter.render(&raw) {
            Rendered::Attachment {
                preview, bytes, ..
            } => {
                assert_eq!(preview.chars().count(), 50);
                assert_eq!(bytes, raw.as_bytes());
            }
            other => panic!("expected attachment, got {other:?}"),
        }
    }

    #[test]
    fn multibyte_preview_cuts_on_char_boundary() {
        let formatter = OutputFormatter::new(3, 2);
        let raw = "日本語テスト";
        match formatter.render(raw) {
            Rendered::Attachment { preview, bytes, .. } => {
                assert_eq!(preview, "日本");
                assert_eq!(bytes, raw.as_bytes());
            }
            other => panic!("expected attachment, got {other:?}"),
        }
    }

    #[test]
    fn describe_stdout_only() {
        assert_eq!(describe_outcome(&outcome("hello\n", "", 0)), "hello\n");
    }

    #[test]
    fn describe_both_streams() {
        let text = describe_outcome(&outcome("out", "err", 1));
        assert_eq!(text, "out\n--- stderr ---\nerr");
    }

    #[test]
    fn describe_no_output() {
        let text = describe_outcome(&outcome("", "", 3));
        assert_eq!(text, "(no output, exit code 3)");
    }

    #[test]
    fn describe_timeout_appends_status_line() {
        let mut o = outcome("partial", "", 124);
        o.status = ExecStatus::TimedOut;
        let text = describe_outcome(&o);
        assert!(text.starts_with("partial"));
        assert!(text.contains("timed out"));
    }

    #[test]
    fn describe_resource_kill() {
        let mut o = outcome("", "", 137);
        o.status = ExecStatus::ResourceExceeded;
        assert!(describe_outcome(&o).contains("memory or process limit"));
    }

    #[test]
    fn describe_truncated_flag() {
        let mut o = outcome("abc", "", 0);
        o.truncated = true;
        assert!(describe_outcome(&o).contains("[output truncated]"));
    }
}
