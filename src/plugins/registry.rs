//! Plugin registry.
//!
//! Built once at startup from a static list and never mutated afterwards.
//! Registration order is significant: when triggers of two plugins both match
//! a message, the plugin registered first wins unless it declines the message.

use std::sync::Arc;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use super::plugin::{Plugin, PluginError};

/// How a plugin is looked up.
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    /// Raw user text, matched against trigger phrases.
    Text(&'a str),
    /// An action name, matched case-insensitively against plugin names.
    Action(&'a str),
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    /// Lowercase trigger phrase and the index of its plugin.
    triggers: Vec<(String, usize)>,
    matcher: Option<AhoCorasick>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list, in order.
    pub fn from_plugins(
        plugins: impl IntoIterator<Item = Arc<dyn Plugin>>,
    ) -> Result<Self, PluginError> {
        let mut registry = Self::new();
        for plugin in plugins {
            registry.register(plugin)?;
        }
        Ok(registry)
    }

    /// Add a plugin. Names must be unique ignoring case.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        if self
            .plugins
            .iter()
            .any(|p| p.name().eq_ignore_ascii_case(plugin.name()))
        {
            return Err(PluginError::DuplicateName(plugin.name().to_string()));
        }

        let index = self.plugins.len();
        for trigger in plugin.triggers() {
            let trigger = trigger.trim().to_lowercase();
            if !trigger.is_empty() {
                self.triggers.push((trigger, index));
            }
        }
        tracing::debug!("Registered plugin: {}", plugin.name());
        self.plugins.push(plugin);
        self.rebuild_matcher();
        Ok(())
    }

    fn rebuild_matcher(&mut self) {
        if self.triggers.is_empty() {
            self.matcher = None;
            return;
        }
        let patterns = self.triggers.iter().map(|(t, _)| t.as_str());
        self.matcher = match AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(patterns)
        {
            Ok(ac) => Some(ac),
            Err(e) => {
                tracing::warn!("Failed to build trigger matcher: {}", e);
                None
            }
        };
    }

    /// The single query for both pre-routing and post-routing.
    pub fn lookup(&self, query: Lookup<'_>) -> Option<Arc<dyn Plugin>> {
        match query {
            Lookup::Text(raw) => self.match_text(raw),
            Lookup::Action(name) => self
                .plugins
                .iter()
                .find(|p| p.name().eq_ignore_ascii_case(name.trim()))
                .cloned(),
        }
    }

    fn match_text(&self, raw: &str) -> Option<Arc<dyn Plugin>> {
        let matcher = self.matcher.as_ref()?;
        let lowered = raw.to_lowercase();
        // Every overlapping hit counts; the earliest-registered plugin that
        // accepts the message wins.
        let mut hits: Vec<usize> = matcher
            .find_overlapping_iter(&lowered)
            .map(|m| self.triggers[m.pattern().as_usize()].1)
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits.into_iter()
            .map(|index| &self.plugins[index])
            .find(|plugin| plugin.accepts(raw))
            .cloned()
    }

    /// Catalog lines for the system prompt, in registration order.
    pub fn prompt_catalog(&self) -> String {
        self.plugins
            .iter()
            .map(|p| p.prompt_description())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
