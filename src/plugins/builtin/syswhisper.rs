//! Explains how the machine has been behaving, from the stored health history.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local};

use crate::activity::HealthJournal;
use crate::activity::health::{model_context, render_summary, summarize};
use crate::llm::{ChatMessage, ProviderRouter};
use crate::plugins::{Plugin, PluginError, PluginOutput};

const WINDOW_HOURS: u32 = 6;
const HEADER: &str = "*SysWhisper PC Intelligence*\n\n";
pub const WARMING_UP: &str =
    "SysWhisper has been running for less than 5 minutes. Ask again soon, it needs time to collect data.";

const ANALYST_PROMPT: &str = "You are a Linux system analyst. Using only the machine history \
provided, answer the user's question in plain language in under 150 words. Name the processes \
responsible when the data shows them. Point out anything suspicious. Do not invent readings.";

pub struct SysWhisperPlugin {
    journal: Arc<HealthJournal>,
    router: Option<Arc<ProviderRouter>>,
}

impl SysWhisperPlugin {
    pub fn new(journal: Arc<HealthJournal>) -> Self {
        Self {
            journal,
            router: None,
        }
    }

    /// Let a model explain the history instead of printing raw numbers.
    pub fn with_router(mut self, router: Arc<ProviderRouter>) -> Self {
        self.router = Some(router);
        self
    }
}

#[async_trait]
impl Plugin for SysWhisperPlugin {
    fn name(&self) -> &str {
        "SYSWHISPER"
    }

    fn description(&self) -> &str {
        "Explain recent PC behaviour from the last hours of resource history, alerts and system errors"
    }

    fn triggers(&self) -> &[&str] {
        &[
            "syswhisper",
            "why is my pc slow",
            "why is my computer slow",
            "why is ram high",
            "why is cpu high",
            "pc history",
            "pc behavior",
            "pc behaviour",
            "pc report",
            "pc intelligence",
            "health report",
            "explain my pc",
            "what was running",
            "what crashed",
            "memory leak",
        ]
    }

    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError> {
        let now = Local::now();
        let journal = self.journal.clone();
        let (window, day, events) = tokio::task::spawn_blocking(move || {
            let window = journal.samples_since(now - Duration::hours(i64::from(WINDOW_HOURS)))?;
            let day = journal.samples_since(now - Duration::hours(24))?;
            let events = journal.events_since(now - Duration::hours(24))?;
            Ok::<_, crate::error::DatabaseError>((window, day, events))
        })
        .await
        .map_err(|e| PluginError::ExecutionFailed(e.to_string()))??;

        let alerts = day.into_iter().flat_map(|s| s.notes).collect();
        let Some(summary) = summarize(&window, alerts, events) else {
            return Ok(PluginOutput::text(WARMING_UP));
        };

        if let Some(router) = &self.router {
            let generation = router
                .generate(&[
                    ChatMessage::system(ANALYST_PROMPT),
                    ChatMessage::user(model_context(&summary, value, WINDOW_HOURS)),
                ])
                .await;
            if !generation.is_unavailable() {
                return Ok(PluginOutput::text(format!("{}{}", HEADER, generation.text.trim())));
            }
            tracing::debug!("No provider for the health summary, using the plain report");
        }
        Ok(PluginOutput::text(format!(
            "{}{}",
            HEADER,
            render_summary(&summary, WINDOW_HOURS)
        )))
    }
}
