//! Runtime-registered plugins.

pub mod builtin;
mod plugin;
mod registry;

pub use plugin::{Plugin, PluginError, PluginOutput};
pub use registry::{Lookup, PluginRegistry};
