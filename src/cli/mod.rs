//! Command-line interface.
//!
//! `kvclaw` with no subcommand starts the agent, same as `kvclaw run`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::agent::Dispatcher;
use crate::llm::{ChatMessage, ProviderRouter};
use crate::plugins::builtin::UsageQuery;
use crate::tools::ToolCatalog;

#[derive(Parser, Debug)]
#[command(name = "kvclaw", version, about = "Personal automation agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the agent with the configured channels, scheduler and watchdog
    Run,

    /// Answer one prompt (plugin triggers first, then the provider chain) and print the reply
    Ask {
        /// Prompt text (words are joined with spaces)
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// Show provider usage
    Usage {
        #[arg(value_enum, default_value_t = UsageView::Today)]
        view: UsageView,
    },

    /// List the tools exposed over HTTP
    Tools,
}

/// Report selectable from the `usage` subcommand.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageView {
    Today,
    Week,
    Limits,
    Tips,
}

impl From<UsageView> for UsageQuery {
    fn from(view: UsageView) -> Self {
        match view {
            UsageView::Today => UsageQuery::Today,
            UsageView::Week => UsageQuery::Week,
            UsageView::Limits => UsageQuery::Warnings,
            UsageView::Tips => UsageQuery::Recommend,
        }
    }
}

/// One-shot prompt without memory. A plugin whose trigger matches answers
/// directly; anything else goes to the provider chain.
pub async fn ask(dispatcher: &Dispatcher, router: &ProviderRouter, prompt: &str) -> String {
    if let Some(plugin) = dispatcher.pre_route(prompt) {
        tracing::debug!(plugin = plugin.name(), "ask pre-routed");
        return dispatcher.run_plugin(plugin.as_ref(), prompt).await.text;
    }
    let generation = router.generate(&[ChatMessage::user(prompt)]).await;
    tracing::debug!(provider = %generation.provider, "ask answered");
    generation.text
}

/// Catalog listing for the terminal.
pub fn render_tools(catalog: &ToolCatalog) -> String {
    let width = catalog
        .tools()
        .iter()
        .map(|t| t.name.len())
        .max()
        .unwrap_or(0);

    let mut out = String::from("Tools:\n\n");
    for tool in catalog.tools() {
        out.push_str(&format!(
            "  {:width$}  {}\n",
            tool.name,
            tool.description,
            width = width
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::llm::LlmProvider;
    use crate::plugins::builtin::NotesPlugin;
    use crate::plugins::{Plugin, PluginRegistry};
    use crate::llm::router::tests::{Script, ScriptedProvider};

    #[test]
    fn test_default_is_run() {
        let cli = Cli::try_parse_from(["kvclaw"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_ask_joins_words() {
        let cli = Cli::try_parse_from(["kvclaw", "ask", "what", "time"]).unwrap();
        match cli.command {
            Some(Command::Ask { prompt }) => assert_eq!(prompt.join(" "), "what time"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ask_requires_prompt() {
        assert!(Cli::try_parse_from(["kvclaw", "ask"]).is_err());
    }

    #[test]
    fn test_usage_views() {
        let cli = Cli::try_parse_from(["kvclaw", "usage"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Usage { view: UsageView::Today })
        ));

        let cli = Cli::try_parse_from(["kvclaw", "usage", "tips"]).unwrap();
        let Some(Command::Usage { view }) = cli.command else {
            panic!("expected usage");
        };
        assert_eq!(UsageQuery::from(view), UsageQuery::Recommend);
        assert_eq!(UsageQuery::from(UsageView::Limits), UsageQuery::Warnings);
    }

    #[test]
    fn test_render_tools_lists_catalog() {
        let listing = render_tools(&ToolCatalog::new());
        assert!(listing.starts_with("Tools:"));
        assert!(listing.contains("run_command"));
        assert!(listing.contains("use_plugin"));
    }

    fn notes_dispatcher(dir: &std::path::Path) -> Dispatcher {
        let registry = PluginRegistry::from_plugins([
            Arc::new(NotesPlugin::new(dir.join("notes.md"))) as Arc<dyn Plugin>
        ])
        .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_ask_uses_router() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new("groq", Script::Reply("pong"));
        let router = ProviderRouter::new(vec![provider.clone() as Arc<dyn LlmProvider>]);
        assert_eq!(ask(&notes_dispatcher(dir.path()), &router, "ping").await, "pong");
    }

    #[tokio::test]
    async fn test_ask_runs_matching_plugin_without_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new("groq", Script::Reply("should not appear"));
        let router = ProviderRouter::new(vec![provider.clone() as Arc<dyn LlmProvider>]);

        let reply = ask(&notes_dispatcher(dir.path()), &router, "note: renew passport").await;

        assert_eq!(reply, "📝 Note saved: renew passport");
        assert_eq!(provider.invocations.load(Ordering::SeqCst), 0);
        let saved = std::fs::read_to_string(dir.path().join("notes.md")).unwrap();
        assert!(saved.contains("renew passport"));
    }
}
