//! Built-in capabilities behind the dispatcher's fixed actions.
//!
//! Unlike plugins these are not registered at runtime; the dispatcher knows
//! each of them by name. [`ToolCatalog`] exposes the same capabilities to
//! external callers.

mod catalog;
pub mod code;
pub mod file;
pub mod search;
pub mod shell;
pub mod system;

pub use catalog::{ToolCatalog, ToolSpec};
pub use code::CodeRunner;
pub use search::{SearchHit, WebSearch};
pub use shell::CommandRunner;
pub use system::{ProcessInfo, ResourceProbe, SysinfoProbe, SystemSnapshot};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::SkillsConfig;

/// Error type for built-in tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Blocked: {0}")]
    Blocked(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("{0}")]
    NotFound(String),
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::ExecutionFailed(err.to_string())
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let path = path.trim();
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Everything the built-in actions need, grouped.
#[derive(Clone)]
pub struct Toolbox {
    pub shell: CommandRunner,
    pub probe: Arc<dyn ResourceProbe>,
    pub search: WebSearch,
    pub code: CodeRunner,
}

impl Toolbox {
    pub fn from_config(config: &SkillsConfig) -> Self {
        Self {
            shell: CommandRunner::new().with_timeout(config.command_timeout),
            probe: Arc::new(SysinfoProbe),
            search: WebSearch::new(config.search_base_url.clone()),
            code: CodeRunner::new(config.code_dir.clone()).with_timeout(config.command_timeout),
        }
    }

    /// Replace the resource probe.
    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~/notes.md"), home.join("notes.md"));
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
