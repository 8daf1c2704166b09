//! Provider usage reports as a chat command.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;

use crate::plugins::{Plugin, PluginError, PluginOutput};
use crate::usage::{ProviderLimit, UsageTracker, report};

/// Which report a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageQuery {
    Today,
    Week,
    Recommend,
    Warnings,
}

impl UsageQuery {
    pub fn from_text(value: &str) -> Self {
        let v = value.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| v.contains(w));
        if has(&["week"]) {
            UsageQuery::Week
        } else if has(&["recommend", "tip", "optimiz", "optimis"]) {
            UsageQuery::Recommend
        } else if has(&["warn", "limit", "critical"]) {
            UsageQuery::Warnings
        } else {
            UsageQuery::Today
        }
    }
}

pub struct UsageReportPlugin {
    tracker: Arc<UsageTracker>,
    limits: Vec<ProviderLimit>,
    warn_ratio: f64,
}

impl UsageReportPlugin {
    pub fn new(tracker: Arc<UsageTracker>, limits: Vec<ProviderLimit>, warn_ratio: f64) -> Self {
        Self {
            tracker,
            limits,
            warn_ratio,
        }
    }

    /// Render a report. Shared with the `usage` CLI subcommand.
    pub fn render(&self, query: UsageQuery) -> Result<String, PluginError> {
        let db = |e: crate::error::DatabaseError| PluginError::ExecutionFailed(e.to_string());
        let now = Local::now().time();
        let text = match query {
            UsageQuery::Today => {
                report::today_report(&self.tracker.today_usage().map_err(db)?, &self.limits, now)
            }
            UsageQuery::Week => report::week_report(&self.tracker.week_usage().map_err(db)?),
            UsageQuery::Recommend => {
                report::recommendation(&self.tracker.today_usage().map_err(db)?, &self.limits, now)
            }
            UsageQuery::Warnings => report::warnings_report(
                &self
                    .tracker
                    .limit_warnings(&self.limits, self.warn_ratio)
                    .map_err(db)?,
            ),
        };
        Ok(text)
    }
}

#[async_trait]
impl Plugin for UsageReportPlugin {
    fn name(&self) -> &str {
        "API_TRACKER"
    }

    fn description(&self) -> &str {
        "Show API usage per provider. VALUE: today, week, limits or tips"
    }

    fn triggers(&self) -> &[&str] {
        &[
            "api usage",
            "api tracker",
            "api stats",
            "api limits",
            "usage stats",
            "how many calls",
            "rate limit",
        ]
    }

    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError> {
        self.render(UsageQuery::from_text(value)).map(PluginOutput::text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn plugin() -> UsageReportPlugin {
        let tracker = Arc::new(UsageTracker::open_in_memory().unwrap());
        let limits = vec![
            ProviderLimit::daily("groq", "Groq", 100),
            ProviderLimit::unlimited("ollama", "Ollama"),
        ];
        UsageReportPlugin::new(tracker, limits, 0.8)
    }

    #[test]
    fn test_query_from_text() {
        assert_eq!(UsageQuery::from_text("api usage this week"), UsageQuery::Week);
        assert_eq!(UsageQuery::from_text("any tips?"), UsageQuery::Recommend);
        assert_eq!(UsageQuery::from_text("am I near the limit"), UsageQuery::Warnings);
        assert_eq!(UsageQuery::from_text(""), UsageQuery::Today);
    }

    #[tokio::test]
    async fn test_today_report_counts_calls() {
        let plugin = plugin();
        for _ in 0..3 {
            plugin.tracker.record("groq", 10).unwrap();
        }
        let out = plugin.execute("api usage").await.unwrap();
        assert!(out.text.starts_with("*API Usage Today"));
        assert!(out.text.contains("3 used / 97 remaining"));
    }

    #[tokio::test]
    async fn test_warnings_when_quiet() {
        let out = plugin().execute("limits").await.unwrap();
        assert_eq!(out.text, "All APIs are within safe limits.");
    }
}
