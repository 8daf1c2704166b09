//! "What did I work on today?"

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;

use crate::activity::ChangeLog;
use crate::plugins::{Plugin, PluginError, PluginOutput};
use crate::tools::expand_home;

pub struct ChangelogPlugin {
    log: Arc<ChangeLog>,
}

impl ChangelogPlugin {
    pub fn new(log: Arc<ChangeLog>) -> Self {
        Self { log }
    }

    async fn watch(&self, value: &str) -> Result<PluginOutput, PluginError> {
        let Some(token) = value
            .split_whitespace()
            .find(|t| t.starts_with('/') || t.starts_with('~'))
        else {
            return Err(PluginError::InvalidInput(
                "which folder? Example: watch folder ~/projects".to_string(),
            ));
        };
        let folder = expand_home(token);
        if !folder.is_dir() {
            return Err(PluginError::InvalidInput(format!(
                "Folder not found: {}",
                folder.display()
            )));
        }

        let log = self.log.clone();
        let target = folder.clone();
        let added = tokio::task::spawn_blocking(move || log.add_folder(&target))
            .await
            .map_err(|e| PluginError::ExecutionFailed(e.to_string()))??;
        if added {
            tracing::info!("Changelog now watching {}", folder.display());
            Ok(PluginOutput::text(format!("👀 Now watching {}", folder.display())))
        } else {
            Ok(PluginOutput::text(format!("Already watching {}", folder.display())))
        }
    }
}

/// Days of history a request asks for.
fn requested_days(value: &str) -> u32 {
    let v = value.to_lowercase();
    if v.contains("week") {
        7
    } else if v.contains("yesterday") {
        2
    } else {
        1
    }
}

#[async_trait]
impl Plugin for ChangelogPlugin {
    fn name(&self) -> &str {
        "CHANGELOG"
    }

    fn description(&self) -> &str {
        "Files and commits the user worked on today, yesterday or this week. 'watch folder <path>' adds a folder"
    }

    fn triggers(&self) -> &[&str] {
        &[
            "changelog",
            "what did i work on",
            "what did i do today",
            "show my work",
            "daily summary",
            "work summary",
            "weekly summary",
            "what files did i change",
            "what did i build today",
            "my progress today",
            "watch folder",
            "track folder",
        ]
    }

    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError> {
        let lowered = value.to_lowercase();
        if lowered.contains("watch folder") || lowered.contains("track folder") {
            return self.watch(value).await;
        }

        let days = requested_days(value);
        let log = self.log.clone();
        let text = tokio::task::spawn_blocking(move || log.report(days, Local::now()))
            .await
            .map_err(|e| PluginError::ExecutionFailed(e.to_string()))??;
        Ok(PluginOutput::text(text))
    }
}
