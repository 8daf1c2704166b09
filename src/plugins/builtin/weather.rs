use async_trait::async_trait;

use crate::plugins::{Plugin, PluginError, PluginOutput};
use crate::tools::WebSearch;
use crate::tools::shell::truncate_chars;

const FILLER: &[&str] = &[
    "what's", "whats", "what", "is", "the", "weather", "forecast", "temperature", "like", "in",
    "for", "at", "today", "now", "right", "how", "tell", "me", "?",
];

/// Pull a place name out of a weather question.
fn location(value: &str) -> String {
    value
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c == '?' || c == ',' || c == '.'))
        .filter(|w| !w.is_empty() && !FILLER.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Weather lookups through web search.
pub struct WeatherPlugin {
    search: WebSearch,
}

impl WeatherPlugin {
    pub fn new(search: WebSearch) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Plugin for WeatherPlugin {
    fn name(&self) -> &str {
        "WEATHER"
    }

    fn description(&self) -> &str {
        "Current weather for a place. VALUE is the location"
    }

    fn triggers(&self) -> &[&str] {
        &["weather", "temperature outside", "forecast"]
    }

    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError> {
        let place = location(value);
        if place.is_empty() {
            return Err(PluginError::InvalidInput("which location?".to_string()));
        }

        let hits = self
            .search
            .search(&format!("weather in {} today", place), 2)
            .await?;
        if hits.is_empty() {
            return Ok(PluginOutput::text(format!("❌ Could not get weather for {}", place)));
        }

        let body: Vec<String> = hits.iter().map(|h| h.body.clone()).collect();
        let text = format!("🌤 *Weather: {}*\n\n{}", place, body.join("\n\n"));
        Ok(PluginOutput::text(truncate_chars(&text, 1000)))
    }
}
