//! Decision routing.
//!
//! Resolves a [`Decision`] to a built-in action, a registered plugin, or
//! nothing. Also owns the pre-routing shortcut (trigger phrases in the raw
//! message) and the plugin execution boundary, where every plugin failure is
//! turned into reply text.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::action::Decision;
use crate::plugins::{Lookup, Plugin, PluginError, PluginRegistry};

/// Actions handled by the agent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Chat,
    RunCommand,
    GetStats,
    GetProcesses,
    WriteAndRunCode,
    WebSearch,
    FileRead,
    FileList,
    RememberFact,
    ClearHistory,
    ApiStatus,
    BotStatus,
}

impl Builtin {
    pub const ALL: [Builtin; 12] = [
        Builtin::RunCommand,
        Builtin::GetStats,
        Builtin::GetProcesses,
        Builtin::WriteAndRunCode,
        Builtin::WebSearch,
        Builtin::FileRead,
        Builtin::FileList,
        Builtin::RememberFact,
        Builtin::ClearHistory,
        Builtin::ApiStatus,
        Builtin::BotStatus,
        Builtin::Chat,
    ];

    /// Protocol name, as a model writes it after `ACTION:`.
    pub fn action(&self) -> &'static str {
        match self {
            Builtin::Chat => "CHAT",
            Builtin::RunCommand => "RUN_COMMAND",
            Builtin::GetStats => "GET_STATS",
            Builtin::GetProcesses => "GET_PROCESSES",
            Builtin::WriteAndRunCode => "WRITE_AND_RUN_CODE",
            Builtin::WebSearch => "WEB_SEARCH",
            Builtin::FileRead => "FILE_READ",
            Builtin::FileList => "FILE_LIST",
            Builtin::RememberFact => "REMEMBER_FACT",
            Builtin::ClearHistory => "CLEAR_HISTORY",
            Builtin::ApiStatus => "API_STATUS",
            Builtin::BotStatus => "BOT_STATUS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Builtin::Chat => "general conversation, VALUE is your reply",
            Builtin::RunCommand => "run a shell command",
            Builtin::GetStats => "system CPU/RAM/disk info",
            Builtin::GetProcesses => "show top processes",
            Builtin::WriteAndRunCode => "write and run Python code, VALUE is the code",
            Builtin::WebSearch => "search the internet",
            Builtin::FileRead => "read a file, VALUE is the path",
            Builtin::FileList => "list files in a directory, VALUE is the path",
            Builtin::RememberFact => "save a fact about the user",
            Builtin::ClearHistory => "clear conversation history",
            Builtin::ApiStatus => "show provider status",
            Builtin::BotStatus => "show agent health",
        }
    }

    /// Case-insensitive lookup by action name.
    pub fn from_action(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|b| b.action().eq_ignore_ascii_case(name))
    }

    /// Catalog lines for the system prompt.
    pub fn prompt_catalog() -> String {
        Self::ALL
            .iter()
            .map(|b| format!("- {}: {}", b.action(), b.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Where a decision goes.
#[derive(Clone)]
pub enum Route {
    Builtin(Builtin),
    Plugin(Arc<dyn Plugin>),
    Unknown,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            Route::Plugin(p) => f.debug_tuple("Plugin").field(&p.name()).finish(),
            Route::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Text (and optional file) to send back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub file: Option<PathBuf>,
    /// The reply reports a failure.
    pub is_error: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: None,
            is_error: true,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    plugin_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            plugin_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_plugin_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Built-ins first, then plugins by name.
    pub fn route(&self, decision: &Decision) -> Route {
        if let Some(builtin) = Builtin::from_action(&decision.action) {
            return Route::Builtin(builtin);
        }
        match self.registry.lookup(Lookup::Action(&decision.action)) {
            Some(plugin) => Route::Plugin(plugin),
            None => Route::Unknown,
        }
    }

    /// Plugin whose trigger appears in the raw message, if any.
    pub fn pre_route(&self, raw: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.lookup(Lookup::Text(raw))
    }

    /// Execute a plugin under the timeout. Never fails.
    pub async fn run_plugin(&self, plugin: &dyn Plugin, value: &str) -> Reply {
        let name = plugin.name();
        let result = match tokio::time::timeout(self.plugin_timeout, plugin.execute(value)).await {
            Ok(result) => result,
            Err(_) => Err(PluginError::Timeout(self.plugin_timeout)),
        };

        match result {
            Ok(output) => Reply {
                text: output.text,
                file: output.file,
                is_error: false,
            },
            Err(e) => {
                tracing::warn!("Plugin {} failed: {}", name, e);
                Reply::error(format!("❌ {} error: {}", name, e))
            }
        }
    }

    /// Reply for a decision nothing could handle.
    pub fn unknown_reply(decision: &Decision) -> Reply {
        let mut text = format!("Unknown action `{}`.", decision.action);
        if !decision.value.is_empty() {
            text.push_str("\n\n");
            text.push_str(&decision.value);
        }
        Reply::text(text)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::plugins::PluginOutput;

    struct Sleepy;

    #[async_trait]
    impl Plugin for Sleepy {
        fn name(&self) -> &str {
            "SLEEPY"
        }

        fn description(&self) -> &str {
            "never finishes"
        }

        fn triggers(&self) -> &[&str] {
            &["nap time"]
        }

        async fn execute(&self, _value: &str) -> Result<PluginOutput, PluginError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(PluginOutput::text("rested"))
        }
    }

    struct Broken;

    #[async_trait]
    impl Plugin for Broken {
        fn name(&self) -> &str {
            "BROKEN"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        fn triggers(&self) -> &[&str] {
            &[]
        }

        async fn execute(&self, _value: &str) -> Result<PluginOutput, PluginError> {
            Err(PluginError::ExecutionFailed("disk on fire".to_string()))
        }
    }

    fn dispatcher() -> Dispatcher {
        let registry = PluginRegistry::from_plugins([
            Arc::new(Sleepy) as Arc<dyn Plugin>,
            Arc::new(Broken),
        ])
        .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    #[test]
    fn test_builtins_case_insensitive() {
        let d = dispatcher();
        assert!(matches!(
            d.route(&Decision::new("get_stats", "")),
            Route::Builtin(Builtin::GetStats)
        ));
        assert!(matches!(
            d.route(&Decision::new("CHAT", "hi")),
            Route::Builtin(Builtin::Chat)
        ));
    }

    #[test]
    fn test_plugin_route_and_unknown() {
        let d = dispatcher();
        assert!(matches!(d.route(&Decision::new("broken", "")), Route::Plugin(_)));
        assert!(matches!(d.route(&Decision::new("TELEPORT", "")), Route::Unknown));
    }

    #[test]
    fn test_every_builtin_roundtrips() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_action(b.action()), Some(b));
        }
        assert_eq!(Builtin::prompt_catalog().lines().count(), Builtin::ALL.len());
    }

    #[test]
    fn test_pre_route() {
        let d = dispatcher();
        assert_eq!(d.pre_route("it's NAP TIME").unwrap().name(), "SLEEPY");
        assert!(d.pre_route("what's up").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plugin_timeout_becomes_text() {
        let d = dispatcher().with_plugin_timeout(Duration::from_secs(5));
        let reply = d.run_plugin(&Sleepy, "").await;
        assert!(reply.is_error);
        assert!(reply.text.contains("SLEEPY"));
        assert!(reply.text.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_plugin_error_becomes_text() {
        let reply = dispatcher().run_plugin(&Broken, "x").await;
        assert_eq!(reply.text, "❌ BROKEN error: Execution failed: disk on fire");
    }

    #[test]
    fn test_unknown_reply() {
        let reply = Dispatcher::unknown_reply(&Decision::new("TELEPORT", "to mars"));
        assert_eq!(reply.text, "Unknown action `TELEPORT`.\n\nto mars");
    }
}
