//! Shared agent state: liveness counters and the short-term window.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::{ChatMessage, ProviderStats};
use crate::memory::ConversationWindow;

/// Liveness and activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub last_heartbeat: DateTime<Utc>,
    pub messages_handled: u64,
    pub errors: u64,
    pub start_time: DateTime<Utc>,
}

impl HealthStatus {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_heartbeat: now,
            messages_handled: 0,
            errors: 0,
            start_time: now,
        }
    }
}

/// State shared between the message loop, the watchdog and status readers.
#[derive(Debug)]
pub struct AgentState {
    health: Mutex<HealthStatus>,
    window: Mutex<ConversationWindow>,
}

impl AgentState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            health: Mutex::new(HealthStatus::new(Utc::now())),
            window: Mutex::new(ConversationWindow::new(history_capacity)),
        }
    }

    pub fn beat(&self) {
        self.beat_at(Utc::now());
    }

    pub fn beat_at(&self, now: DateTime<Utc>) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        health.last_heartbeat = now;
    }

    pub fn record_message(&self) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        health.messages_handled += 1;
    }

    pub fn record_error(&self) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        health.errors += 1;
    }

    /// Copy of the current counters.
    pub fn health(&self) -> HealthStatus {
        *self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.health().last_heartbeat
    }

    pub fn remember(&self, message: ChatMessage) {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    pub fn clear_history(&self) {
        self.window.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    format!("{}h {}m {}s", h, m, s)
}

/// The BOT_STATUS reply.
pub fn render_bot_status(
    health: &HealthStatus,
    now: DateTime<Utc>,
    stats: &[(String, ProviderStats)],
    plugin_count: usize,
) -> String {
    let uptime = (now - health.start_time).num_seconds();
    let since_beat = (now - health.last_heartbeat).num_seconds().max(0);

    let mut out = format!(
        "*Bot Health Status*\n\nUptime: {}\nMessages handled: {}\nErrors: {}\nLast heartbeat: {}s ago\nPlugins loaded: {}\n",
        format_uptime(uptime),
        health.messages_handled,
        health.errors,
        since_beat,
        plugin_count,
    );
    if !stats.is_empty() {
        out.push_str("\n*Provider calls:*\n");
        for (name, s) in stats {
            out.push_str(&format!("- {}: {} ok, {} failed\n", name, s.calls, s.fails));
        }
    }
    out
}

/// The API_STATUS reply: the fallback chain in order.
pub fn render_api_status(
    chain: &[(String, String, bool)],
    stats: &[(String, ProviderStats)],
) -> String {
    if chain.is_empty() {
        return "*API Status*\n\nNo providers configured.".to_string();
    }

    let mut out = String::from("*API Status*\n\n");
    for (i, (name, model, is_local)) in chain.iter().enumerate() {
        let s = stats
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .unwrap_or_default();
        let kind = if *is_local { "local" } else { "remote" };
        out.push_str(&format!(
            "{}. {} ({}, {}) calls: {}, fails: {}\n",
            i + 1,
            name,
            model,
            kind,
            s.calls,
            s.fails
        ));
    }
    out
}
