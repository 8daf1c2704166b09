//! Prompt assembly for every router call.

use std::sync::Arc;

use crate::agent::dispatcher::Builtin;
use crate::llm::ChatMessage;
use crate::memory::{LongTermMemory, MemoryCategory};
use crate::plugins::PluginRegistry;

const PROTOCOL: &str = "\
Always answer in exactly this format:
ACTION: <one action name from the lists below>
VALUE: <the input for that action>

VALUE may continue over several lines (for code). For normal conversation use
ACTION: CHAT and put your reply in VALUE.";

/// What long-term memory contributed to one prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recall {
    pub facts: Vec<String>,
    pub conversations: Vec<String>,
}

/// The system preamble. Pure; recall is fetched separately.
pub fn system_prompt(agent_name: &str, recall: &Recall, plugin_catalog: &str) -> String {
    let mut out = format!(
        "You are {}, a personal automation agent running on the user's own machine. \
         You can run commands, inspect the system, search the web and use plugins.\n",
        agent_name
    );

    if !recall.facts.is_empty() {
        out.push_str("\nKnown facts about the user:\n");
        for fact in &recall.facts {
            out.push_str(&format!("- {}\n", fact));
        }
    }

    if !recall.conversations.is_empty() {
        out.push_str("\nRelevant past conversations:\n");
        for convo in &recall.conversations {
            out.push_str(&format!("---\n{}\n", convo));
        }
    }

    out.push('\n');
    out.push_str(PROTOCOL);
    out.push_str("\n\nBuilt-in actions:\n");
    out.push_str(&Builtin::prompt_catalog());
    if !plugin_catalog.is_empty() {
        out.push_str("\n\nPlugins:\n");
        out.push_str(plugin_catalog);
    }
    out
}

pub struct ContextBuilder {
    agent_name: String,
    memory: Option<Arc<LongTermMemory>>,
    registry: Arc<PluginRegistry>,
    fact_results: usize,
    conversation_results: usize,
}

impl ContextBuilder {
    pub fn new(agent_name: impl Into<String>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            agent_name: agent_name.into(),
            memory: None,
            registry,
            fact_results: 3,
            conversation_results: 4,
        }
    }

    pub fn with_memory(mut self, memory: Arc<LongTermMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_result_limits(mut self, facts: usize, conversations: usize) -> Self {
        self.fact_results = facts;
        self.conversation_results = conversations;
        self
    }

    /// Facts and past conversations related to `query`. Failures are logged
    /// and leave that part empty.
    pub async fn recall(&self, query: &str) -> Recall {
        let Some(memory) = &self.memory else {
            return Recall::default();
        };

        let mut recall = Recall::default();
        match memory.search(MemoryCategory::Fact, query, self.fact_results).await {
            Ok(hits) => recall.facts = hits.into_iter().map(|h| h.record.text).collect(),
            Err(e) => tracing::warn!("Fact recall failed: {}", e),
        }
        match memory
            .search(MemoryCategory::Conversation, query, self.conversation_results)
            .await
        {
            Ok(hits) => recall.conversations = hits.into_iter().map(|h| h.record.text).collect(),
            Err(e) => tracing::warn!("Conversation recall failed: {}", e),
        }
        recall
    }

    /// System preamble, then the window, then the new message.
    pub async fn build(&self, history: Vec<ChatMessage>, user_message: &str) -> Vec<ChatMessage> {
        let recall = self.recall(user_message).await;
        let system = system_prompt(&self.agent_name, &recall, &self.registry.prompt_catalog());

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(history);
        messages.push(ChatMessage::user(user_message));
        messages
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::llm::Role;
    use crate::memory::HashedEmbeddings;

    fn registry() -> Arc<PluginRegistry> {
        Arc::new(PluginRegistry::new())
    }

    #[test]
    fn test_system_prompt_sections() {
        let recall = Recall {
            facts: vec!["Lives in Oslo".to_string()],
            conversations: vec!["User: hi\nkvclaw: hello".to_string()],
        };
        let prompt = system_prompt("kvclaw", &recall, "- NOTES: notes (triggers: note:)");

        assert!(prompt.starts_with("You are kvclaw"));
        assert!(prompt.contains("- Lives in Oslo"));
        assert!(prompt.contains("---\nUser: hi\nkvclaw: hello"));
        assert!(prompt.contains("ACTION: <one action name"));
        assert!(prompt.contains("- RUN_COMMAND: run a shell command"));
        assert!(prompt.contains("Plugins:\n- NOTES"));
    }

    #[test]
    fn test_system_prompt_without_recall() {
        let prompt = system_prompt("kvclaw", &Recall::default(), "");
        assert!(!prompt.contains("Known facts"));
        assert!(!prompt.contains("Plugins:"));
    }

    #[tokio::test]
    async fn test_build_orders_messages() {
        let builder = ContextBuilder::new("kvclaw", registry());
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];

        let messages = builder.build(history, "now").await;
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[3].content, "now");
    }

    #[tokio::test]
    async fn test_build_includes_recalled_facts() {
        let memory = Arc::new(
            LongTermMemory::open_in_memory(Arc::new(HashedEmbeddings::new(256))).unwrap(),
        );
        memory
            .append(MemoryCategory::Fact, "favourite editor is helix")
            .await
            .unwrap();

        let builder = ContextBuilder::new("kvclaw", registry()).with_memory(memory);
        let messages = builder.build(Vec::new(), "which editor do I use?").await;
        assert!(messages[0].content.contains("favourite editor is helix"));
    }
}
