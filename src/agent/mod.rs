//! Core agent logic.
//!
//! The agent orchestrates:
//! - Parsing provider replies into decisions
//! - Routing decisions to built-ins and plugins
//! - Context assembly from short- and long-term memory
//! - Proactive scheduled jobs
//! - The heartbeat watchdog

pub mod action;
mod agent_loop;
pub mod context;
pub mod dispatcher;
pub mod scheduler;
mod state;
pub mod watchdog;

pub use action::{CHAT, Decision, parse_reply};
pub use agent_loop::{Agent, AgentDeps, DECISION_KEY, chunk_reply};
pub use context::{ContextBuilder, Recall};
pub use dispatcher::{Builtin, Dispatcher, Reply, Route};
pub use scheduler::{Job, Scheduler, SchedulerConfig};
pub use state::{AgentState, HealthStatus, render_api_status, render_bot_status};
pub use watchdog::{Verdict, Watchdog, WatchdogConfig};
