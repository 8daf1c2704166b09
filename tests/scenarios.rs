//! End-to-end message handling with in-process providers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use kvclaw::agent::{
    Agent, AgentDeps, AgentState, CHAT, ContextBuilder, Decision, Dispatcher, parse_reply,
};
use kvclaw::channels::ChannelManager;
use kvclaw::config::{AgentConfig, SkillsConfig};
use kvclaw::error::LlmError;
use kvclaw::llm::{ChatMessage, Completion, LlmProvider, ProviderRouter, ProviderStats};
use kvclaw::plugins::builtin::NotesPlugin;
use kvclaw::plugins::{Plugin, PluginRegistry};
use kvclaw::tools::{ProcessInfo, ResourceProbe, SystemSnapshot, ToolError, Toolbox};

enum Behavior {
    Answer(&'static str),
    Hang,
}

struct MockProvider {
    name: &'static str,
    local: bool,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockProvider {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            local: false,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn local(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            local: true,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    fn is_local(&self) -> bool {
        self.local
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Answer(text) => Ok(Completion {
                content: text.to_string(),
                tokens: 10,
            }),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

struct StaticProbe;

#[async_trait]
impl ResourceProbe for StaticProbe {
    async fn snapshot(&self) -> Result<SystemSnapshot, ToolError> {
        Ok(SystemSnapshot {
            cpu_percent: 37.5,
            ram_used: 2_500,
            ram_total: 10_000,
            disk_used: 6_000,
            disk_total: 10_000,
        })
    }

    async fn top_processes(&self, _n: usize) -> Result<Vec<ProcessInfo>, ToolError> {
        Ok(Vec::new())
    }
}

struct Setup {
    agent: Agent,
    router: Arc<ProviderRouter>,
    notes_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn setup(providers: Vec<Arc<MockProvider>>) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let notes_path = dir.path().join("notes.md");

    let providers: Vec<Arc<dyn LlmProvider>> = providers
        .into_iter()
        .map(|p| p as Arc<dyn LlmProvider>)
        .collect();
    let router = Arc::new(ProviderRouter::new(providers).with_timeout(Duration::from_millis(50)));

    let registry = Arc::new(
        PluginRegistry::from_plugins([
            Arc::new(NotesPlugin::new(notes_path.clone())) as Arc<dyn Plugin>
        ])
        .unwrap(),
    );
    let config = AgentConfig::default();
    let deps = AgentDeps {
        router: router.clone(),
        dispatcher: Arc::new(Dispatcher::new(registry.clone())),
        context: ContextBuilder::new("kvclaw", registry),
        toolbox: Toolbox::from_config(&SkillsConfig::in_dir(dir.path()))
            .with_probe(Arc::new(StaticProbe)),
        memory: None,
        state: Arc::new(AgentState::new(config.history_capacity)),
    };

    Setup {
        agent: Agent::new(config, deps, Arc::new(ChannelManager::new())),
        router,
        notes_path,
        _dir: dir,
    }
}

#[tokio::test]
async fn stats_request_runs_through_provider_and_dispatcher() {
    let groq = MockProvider::new("groq", Behavior::Answer("ACTION: GET_STATS\nVALUE: now"));
    let s = setup(vec![groq.clone()]);

    let reply = s.agent.process("what's my CPU usage").await;

    assert_eq!(groq.calls.load(Ordering::SeqCst), 1);
    assert!(!reply.is_error);
    assert!(reply.text.contains("CPU: 37.5%"));
    assert!(reply.text.contains("(25.0%)"));
    assert!(reply.text.contains("(60.0%)"));
}

#[tokio::test]
async fn falls_back_to_local_provider_after_timeouts() {
    let groq = MockProvider::new("groq", Behavior::Hang);
    let gemini = MockProvider::new("gemini", Behavior::Hang);
    let ollama = MockProvider::local("ollama", Behavior::Answer("ACTION: CHAT\nVALUE: hello"));
    let s = setup(vec![groq, gemini, ollama.clone()]);

    let generation = s.router.generate(&[ChatMessage::user("hi")]).await;
    assert_eq!(generation.provider, "ollama");
    assert_eq!(parse_reply(&generation.text), Decision::new(CHAT, "hello"));

    assert_eq!(
        s.router.stats(),
        vec![
            ("groq".to_string(), ProviderStats { calls: 0, fails: 1 }),
            ("gemini".to_string(), ProviderStats { calls: 0, fails: 1 }),
            ("ollama".to_string(), ProviderStats { calls: 1, fails: 0 }),
        ]
    );

    let reply = s.agent.process("hi again").await;
    assert_eq!(reply.text, "hello");
    assert_eq!(ollama.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn note_is_saved_without_calling_a_provider() {
    let groq = MockProvider::new("groq", Behavior::Answer("ACTION: CHAT\nVALUE: should not appear"));
    let s = setup(vec![groq.clone()]);

    let reply = s.agent.process("note: buy milk").await;

    assert_eq!(groq.calls.load(Ordering::SeqCst), 0);
    assert!(reply.text.contains("Note saved: buy milk"));
    let saved = std::fs::read_to_string(&s.notes_path).unwrap();
    assert!(saved.contains("buy milk"));
    assert_eq!(s.router.stats()[0].1, ProviderStats::default());
}
