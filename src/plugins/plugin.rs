//! Plugin trait and types.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Error type for plugin execution.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Plugin name {0} is already registered")]
    DuplicateName(String),
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::ExecutionFailed(err.to_string())
    }
}

impl From<crate::tools::ToolError> for PluginError {
    fn from(err: crate::tools::ToolError) -> Self {
        use crate::tools::ToolError;
        match err {
            ToolError::InvalidParameters(msg) | ToolError::NotFound(msg) => {
                PluginError::InvalidInput(msg)
            }
            ToolError::Timeout(d) => PluginError::Timeout(d),
            ToolError::ExternalService(msg) => PluginError::ExternalService(msg),
            other => PluginError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<crate::error::DatabaseError> for PluginError {
    fn from(err: crate::error::DatabaseError) -> Self {
        PluginError::ExecutionFailed(err.to_string())
    }
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        PluginError::ExternalService(err.to_string())
    }
}

/// Output from a plugin execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginOutput {
    /// Reply text for the user.
    pub text: String,
    /// A file to deliver alongside the text, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl PluginOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// A self-contained capability with trigger keywords.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name, also the action name a model uses to invoke it.
    fn name(&self) -> &str;

    /// What the plugin does, shown to the model.
    fn description(&self) -> &str;

    /// Lowercase phrases that route a raw message straight to this plugin.
    fn triggers(&self) -> &[&str];

    /// Whether a raw message whose text matched a trigger is really meant for
    /// this plugin. Declining lets pre-routing move on to the next match.
    fn accepts(&self, _raw: &str) -> bool {
        true
    }

    /// Run the plugin on the action value (or the raw message when pre-routed).
    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError>;

    /// One catalog line for the system prompt.
    fn prompt_description(&self) -> String {
        format!(
            "- {}: {} (triggers: {})",
            self.name().to_uppercase(),
            self.description(),
            self.triggers().join(", ")
        )
    }
}
