//! Heartbeat watchdog.
//!
//! Runs on its own OS thread so a wedged tokio runtime cannot starve it. When
//! the message loop has not beaten for longer than the threshold the process
//! exits with status 1 and the supervisor restarts it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::agent::state::AgentState;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// How often the heartbeat is inspected.
    pub check_interval: Duration,
    /// Silence longer than this is a stall.
    pub threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(60),
            threshold: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    Stalled { silent_for: Duration },
}

/// Pure liveness check. Stalled iff `now - last_heartbeat > threshold`.
pub fn verdict(last_heartbeat: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> Verdict {
    let silent_for = (now - last_heartbeat).to_std().unwrap_or(Duration::ZERO);
    if silent_for > threshold {
        Verdict::Stalled { silent_for }
    } else {
        Verdict::Alive
    }
}

type StallHook = Box<dyn Fn(Duration) + Send + Sync>;

pub struct Watchdog {
    config: WatchdogConfig,
    state: Arc<AgentState>,
    on_stall: StallHook,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, state: Arc<AgentState>) -> Self {
        Self {
            config,
            state,
            on_stall: Box::new(|silent_for| {
                tracing::error!(
                    "No heartbeat for {}s, exiting for restart",
                    silent_for.as_secs()
                );
                std::process::exit(1);
            }),
        }
    }

    /// Replace what happens on a stall. The default exits the process.
    pub fn with_on_stall(mut self, hook: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.on_stall = Box::new(hook);
        self
    }

    pub fn verdict(&self, now: DateTime<Utc>) -> Verdict {
        verdict(self.state.last_heartbeat(), now, self.config.threshold)
    }

    /// One inspection. Returns the verdict after running the stall hook if needed.
    pub fn check(&self) -> Verdict {
        let v = self.verdict(Utc::now());
        if let Verdict::Stalled { silent_for } = v {
            (self.on_stall)(silent_for);
        }
        v
    }

    /// Start the watchdog thread. Returns `None` when disabled.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Watchdog is disabled");
            return None;
        }

        tracing::info!(
            "Starting watchdog: check every {:?}, threshold {:?}",
            self.config.check_interval,
            self.config.threshold
        );

        let handle = std::thread::Builder::new()
            .name("kvclaw-watchdog".to_string())
            .spawn(move || loop {
                std::thread::sleep(self.config.check_interval);
                if let Verdict::Stalled { .. } = self.check() {
                    break;
                }
            });

        match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to start watchdog thread: {}", e);
                None
            }
        }
    }
}
