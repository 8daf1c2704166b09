//! Shell command execution.
//!
//! Commands run through `sh -c` with a hard timeout. A small blocklist rejects
//! commands that would wreck the host, and output is truncated before it is
//! sent back to the user.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::tools::ToolError;

/// Maximum characters of command output returned to the user.
pub const MAX_OUTPUT_CHARS: usize = 3000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Patterns that are always refused.
const BLOCKED_PATTERNS: &[&str] = &["rm -rf /", "mkfs", "dd if=", ":(){:|:&};:", ":(){ :|:& };:"];

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout if present, else stderr, else a placeholder.
    pub fn text(&self) -> &str {
        if !self.stdout.trim().is_empty() {
            &self.stdout
        } else if !self.stderr.trim().is_empty() {
            &self.stderr
        } else {
            "No output"
        }
    }
}

/// Run a program directly (no shell) with a timeout. The child is killed if
/// the timeout elapses.
pub async fn run_program(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ProcessOutput, ToolError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let child = command
        .spawn()
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to spawn {}: {}", program, e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        }),
        Ok(Err(e)) => Err(ToolError::ExecutionFailed(format!(
            "Command execution failed: {}",
            e
        ))),
        Err(_) => Err(ToolError::Timeout(timeout)),
    }
}

/// Runs user-requested shell commands.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the matched pattern if the command is refused.
    pub fn is_blocked(&self, cmd: &str) -> Option<&'static str> {
        let normalized = cmd.to_lowercase();
        BLOCKED_PATTERNS
            .iter()
            .find(|pattern| normalized.contains(*pattern))
            .copied()
    }

    pub async fn run(&self, cmd: &str) -> Result<ProcessOutput, ToolError> {
        if let Some(pattern) = self.is_blocked(cmd) {
            tracing::warn!("Refusing blocked command pattern {:?}", pattern);
            return Err(ToolError::Blocked(truncate_for_error(cmd)));
        }
        if cmd.trim().is_empty() {
            return Err(ToolError::InvalidParameters("empty command".to_string()));
        }

        tracing::info!("Running command: {}", truncate_for_error(cmd));
        run_program("sh", &["-c", cmd], self.working_dir.as_deref(), self.timeout).await
    }

    /// Run and render the user-facing reply, folding errors into text.
    pub async fn run_for_reply(&self, cmd: &str) -> String {
        let body = match self.run(cmd).await {
            Ok(output) => truncate_chars(output.text(), MAX_OUTPUT_CHARS).to_string(),
            Err(ToolError::Blocked(_)) => "Blocked dangerous command".to_string(),
            Err(ToolError::Timeout(after)) => format!("Timed out after {} seconds", after.as_secs()),
            Err(e) => format!("Error: {}", e),
        };
        format!("Ran: {}\n\n{}", cmd, body)
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn truncate_for_error(s: &str) -> String {
    if s.chars().count() <= 100 {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(100).collect::<String>())
    }
}
