//! Main agent loop.
//!
//! Messages are handled one at a time: pre-route on trigger phrases, else
//! build context, ask the provider chain, parse the reply into a decision and
//! dispatch it. Every message gets a reply; failures below this point are
//! turned into text and counted.

use std::sync::Arc;

use chrono::{Local, Utc};
use futures::StreamExt;
use tokio::time::MissedTickBehavior;

use crate::agent::action::{Decision, parse_reply};
use crate::agent::context::ContextBuilder;
use crate::agent::dispatcher::{Builtin, Dispatcher, Reply, Route};
use crate::agent::state::{AgentState, render_api_status, render_bot_status};
use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse};
use crate::config::AgentConfig;
use crate::error::Error;
use crate::llm::{ChatMessage, ProviderRouter};
use crate::memory::{LongTermMemory, MemoryCategory};
use crate::tools::shell::truncate_chars;
use crate::tools::system::{format_processes, format_stats};
use crate::tools::{Toolbox, file};

/// Metadata key carrying a pre-built [`Decision`]. Messages with it skip the
/// provider chain and are dispatched directly.
pub const DECISION_KEY: &str = "decision";

const TOP_PROCESSES: usize = 5;
const SEARCH_RESULTS: usize = 5;
const SEARCH_FALLBACK_HITS: usize = 3;

/// Core dependencies for the agent.
pub struct AgentDeps {
    pub router: Arc<ProviderRouter>,
    pub dispatcher: Arc<Dispatcher>,
    pub context: ContextBuilder,
    pub toolbox: Toolbox,
    pub memory: Option<Arc<LongTermMemory>>,
    pub state: Arc<AgentState>,
}

pub struct Agent {
    config: AgentConfig,
    deps: AgentDeps,
    channels: Arc<ChannelManager>,
}

impl Agent {
    pub fn new(config: AgentConfig, deps: AgentDeps, channels: Arc<ChannelManager>) -> Self {
        Self {
            config,
            deps,
            channels,
        }
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.deps.state
    }

    /// Run until every channel closes or Ctrl-C.
    pub async fn run(self) -> Result<(), Error> {
        let mut messages = self.channels.start_all().await?;

        let mut idle = tokio::time::interval(self.config.idle_beat_interval);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("{} is running", self.config.name);

        loop {
            tokio::select! {
                next = messages.next() => {
                    let Some(msg) = next else {
                        tracing::info!("All channels closed");
                        break;
                    };
                    self.deps.state.beat();
                    if let Some(reply) = self.handle_message(&msg).await {
                        self.send_reply(&msg, reply).await;
                    }
                    self.deps.state.beat();
                }
                _ = idle.tick() => {
                    self.deps.state.beat();
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                    break;
                }
            }
        }

        self.channels.shutdown_all().await?;
        Ok(())
    }

    /// Handle one inbound message. `None` means the message is ignored.
    pub async fn handle_message(&self, msg: &IncomingMessage) -> Option<Reply> {
        if msg.user_id != self.config.user_id {
            tracing::warn!(
                channel = %msg.channel,
                user_id = %msg.user_id,
                "Ignoring message from unauthorized user"
            );
            return None;
        }

        if let Some(raw) = msg.metadata.get(DECISION_KEY) {
            let reply = match serde_json::from_value::<Decision>(raw.clone()) {
                Ok(decision) => {
                    self.deps.state.record_message();
                    self.execute(&decision).await
                }
                Err(e) => Reply::error(format!("❌ Invalid decision: {}", e)),
            };
            if reply.is_error {
                self.deps.state.record_error();
            }
            self.remember(&msg.content, &reply).await;
            return Some(reply);
        }

        Some(self.process(&msg.content).await)
    }

    /// The full pipeline for a free-text message.
    pub async fn process(&self, text: &str) -> Reply {
        self.deps.state.record_message();
        let text = text.trim();

        let reply = if let Some(plugin) = self.deps.dispatcher.pre_route(text) {
            tracing::debug!("Pre-routed to plugin {}", plugin.name());
            self.deps.dispatcher.run_plugin(plugin.as_ref(), text).await
        } else {
            let context = self.deps.context.build(self.deps.state.history(), text).await;
            let generation = self.deps.router.generate(&context).await;
            if generation.is_unavailable() {
                Reply::error(generation.text)
            } else {
                let decision = parse_reply(&generation.text);
                tracing::debug!(
                    provider = %generation.provider,
                    action = %decision.action,
                    "Parsed decision"
                );
                self.execute(&decision).await
            }
        };

        if reply.is_error {
            self.deps.state.record_error();
        }
        self.remember(text, &reply).await;
        reply
    }

    /// Dispatch a decision.
    pub async fn execute(&self, decision: &Decision) -> Reply {
        match self.deps.dispatcher.route(decision) {
            Route::Builtin(builtin) => self.execute_builtin(builtin, &decision.value).await,
            Route::Plugin(plugin) => {
                self.deps
                    .dispatcher
                    .run_plugin(plugin.as_ref(), &decision.value)
                    .await
            }
            Route::Unknown => {
                tracing::warn!("Unknown action {}", decision.action);
                Dispatcher::unknown_reply(decision)
            }
        }
    }

    async fn execute_builtin(&self, builtin: Builtin, value: &str) -> Reply {
        let tools = &self.deps.toolbox;
        match builtin {
            Builtin::Chat => Reply::text(value),
            Builtin::RunCommand => Reply::text(tools.shell.run_for_reply(value).await),
            Builtin::GetStats => match tools.probe.snapshot().await {
                Ok(s) => Reply::text(format_stats(&s, Local::now())),
                Err(e) => Reply::error(format!("❌ Could not read system stats: {}", e)),
            },
            Builtin::GetProcesses => match tools.probe.top_processes(TOP_PROCESSES).await {
                Ok(procs) => Reply::text(format_processes(&procs)),
                Err(e) => Reply::error(format!("❌ Could not list processes: {}", e)),
            },
            Builtin::WriteAndRunCode => match tools.code.run(value).await {
                Ok(run) => Reply {
                    text: run.render(),
                    file: Some(run.path),
                    is_error: false,
                },
                Err(e) => Reply::error(format!("❌ Code error: {}", e)),
            },
            Builtin::WebSearch => self.web_search(value).await,
            Builtin::FileRead => match file::read_head(value).await {
                Ok(text) => Reply::text(text),
                Err(e) => Reply::error(format!("❌ {}", e)),
            },
            Builtin::FileList => match file::list_dir(value).await {
                Ok(text) => Reply::text(text),
                Err(e) => Reply::error(format!("❌ {}", e)),
            },
            Builtin::RememberFact => self.remember_fact(value).await,
            Builtin::ClearHistory => {
                self.deps.state.clear_history();
                Reply::text("History cleared!")
            }
            Builtin::ApiStatus => Reply::text(render_api_status(
                &self.deps.router.describe(),
                &self.deps.router.stats(),
            )),
            Builtin::BotStatus => Reply::text(render_bot_status(
                &self.deps.state.health(),
                Utc::now(),
                &self.deps.router.stats(),
                self.deps.dispatcher.registry().len(),
            )),
        }
    }

    async fn remember_fact(&self, value: &str) -> Reply {
        let fact = value.trim();
        if fact.is_empty() {
            return Reply::error("❌ Nothing to remember.");
        }
        let Some(memory) = &self.deps.memory else {
            return Reply::error("❌ Long-term memory is not available.");
        };
        match memory.append(MemoryCategory::Fact, fact).await {
            Ok(_) => Reply::text(format!("Remembered: {}", fact)),
            Err(e) => {
                tracing::warn!("Failed to store fact: {}", e);
                Reply::error(format!("❌ Could not remember that: {}", e))
            }
        }
    }

    /// Search, then summarize through the provider chain. Falls back to the
    /// raw top hits when no provider answers.
    async fn web_search(&self, query: &str) -> Reply {
        let hits = match self.deps.toolbox.search.search(query, SEARCH_RESULTS).await {
            Ok(hits) => hits,
            Err(e) => return Reply::error(format!("❌ Search failed: {}", e)),
        };
        if hits.is_empty() {
            return Reply::text(format!("No results found for: {}", query.trim()));
        }

        let rendered: Vec<String> = hits.iter().map(|h| h.render()).collect();
        let prompt = vec![
            ChatMessage::system(
                "Summarize these search results to answer the question concisely. \
                 Reply in plain text.",
            ),
            ChatMessage::user(format!(
                "Question: {}\n\nResults:\n{}",
                query.trim(),
                rendered.join("\n\n")
            )),
        ];

        let generation = self.deps.router.generate(&prompt).await;
        let body = if generation.is_unavailable() {
            rendered
                .iter()
                .take(SEARCH_FALLBACK_HITS)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            generation.text
        };
        Reply::text(format!("🔍 *{}*\n\n{}", query.trim(), body))
    }

    /// Update the short-term window and the conversation log.
    async fn remember(&self, text: &str, reply: &Reply) {
        let stored = truncate_chars(&reply.text, self.config.history_reply_chars);
        self.deps.state.remember(ChatMessage::user(text));
        self.deps.state.remember(ChatMessage::assistant(stored));

        if let Some(memory) = &self.deps.memory {
            let entry = format!("User: {}\n{}: {}", text, self.config.name, stored);
            if let Err(e) = memory.append(MemoryCategory::Conversation, &entry).await {
                tracing::warn!("Failed to log conversation: {}", e);
            }
        }
    }

    /// Deliver a reply in chunks, retrying each with a fixed backoff.
    pub async fn send_reply(&self, msg: &IncomingMessage, reply: Reply) {
        let chunks = chunk_reply(&reply.text, self.config.max_reply_chars);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut response = OutgoingResponse::text(chunk);
            if let Some(thread) = &msg.thread_id {
                response = response.in_thread(thread.clone());
            }
            if i == last {
                if let Some(path) = &reply.file {
                    response.metadata = serde_json::json!({ "file": path });
                }
            }

            if !self.send_with_retry(msg, response).await {
                self.deps.state.record_error();
                return;
            }
        }
    }

    async fn send_with_retry(&self, msg: &IncomingMessage, response: OutgoingResponse) -> bool {
        let attempts = self.config.reply_retries.max(1);
        for attempt in 1..=attempts {
            match self.channels.respond(msg, response.clone()).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!("Reply attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.reply_backoff).await;
                    }
                }
            }
        }
        tracing::error!("Giving up on reply to {} after {} attempts", msg.channel, attempts);
        false
    }
}

/// Split `text` into pieces of at most `max_chars` characters, preferring
/// newline boundaries. The pieces concatenate back to `text`.
pub fn chunk_reply(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let Some((hard, _)) = rest.char_indices().nth(max_chars) else {
            chunks.push(rest.to_string());
            break;
        };
        let cut = match rest[..hard].rfind('\n') {
            Some(i) if i > 0 => i + 1,
            _ => hard,
        };
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    chunks
}
