//! kvclaw: a personal automation agent.
//!
//! A single authorized user talks to the agent through a channel. Each
//! message is either claimed by a plugin's trigger, or sent through the
//! provider fallback chain whose reply is parsed into a decision and
//! dispatched to a built-in action or plugin.

pub mod activity;
pub mod agent;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod plugins;
pub mod tools;
pub mod usage;
