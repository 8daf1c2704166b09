//! Ordered provider fallback.
//!
//! Providers are tried strictly in the order they were configured. The first
//! success wins; every failure is counted and the next provider is tried. When
//! the whole chain fails the caller gets a fixed sentinel reply instead of an
//! error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, LlmProvider};
use crate::usage::UsageTracker;

/// Reply text returned when no provider could answer.
pub const UNAVAILABLE_REPLY: &str = "All providers unavailable.";

/// Provider name reported alongside [`UNAVAILABLE_REPLY`].
pub const NO_PROVIDER: &str = "none";

/// Success and failure counters for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub calls: u64,
    pub fails: u64,
}

/// Text produced by the chain and the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub provider: String,
}

impl Generation {
    /// True when no provider answered.
    pub fn is_unavailable(&self) -> bool {
        self.provider == NO_PROVIDER
    }
}

pub struct ProviderRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    stats: Mutex<HashMap<String, ProviderStats>>,
    usage: Option<Arc<UsageTracker>>,
    timeout: Duration,
}

impl ProviderRouter {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let stats = providers
            .iter()
            .map(|p| (p.name().to_string(), ProviderStats::default()))
            .collect();
        Self {
            providers,
            stats: Mutex::new(stats),
            usage: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Record every successful call in a usage tracker.
    pub fn with_usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Hard timeout applied to each provider call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Provider name and model pairs in fallback order.
    pub fn describe(&self) -> Vec<(String, String, bool)> {
        self.providers
            .iter()
            .map(|p| (p.name().to_string(), p.model_name().to_string(), p.is_local()))
            .collect()
    }

    /// Snapshot of all counters, in fallback order.
    pub fn stats(&self) -> Vec<(String, ProviderStats)> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        self.providers
            .iter()
            .map(|p| {
                let name = p.name().to_string();
                let s = stats.get(&name).copied().unwrap_or_default();
                (name, s)
            })
            .collect()
    }

    pub fn stats_for(&self, provider: &str) -> ProviderStats {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.get(provider).copied().unwrap_or_default()
    }

    /// Run the fallback chain. Never fails.
    pub async fn generate(&self, messages: &[ChatMessage]) -> Generation {
        for provider in &self.providers {
            let name = provider.name();
            match self.call(provider.as_ref(), messages).await {
                Ok(completion) => {
                    self.bump(name, |s| s.calls += 1);
                    if let Some(usage) = &self.usage {
                        self.record_usage(Arc::clone(usage), name, completion.tokens).await;
                    }
                    tracing::debug!(provider = name, tokens = completion.tokens, "Generation succeeded");
                    return Generation {
                        text: completion.content,
                        provider: name.to_string(),
                    };
                }
                Err(e) => {
                    self.bump(name, |s| s.fails += 1);
                    tracing::warn!("Provider {} failed, trying next: {}", name, e);
                }
            }
        }

        tracing::error!("Every provider in the chain failed");
        Generation {
            text: UNAVAILABLE_REPLY.to_string(),
            provider: NO_PROVIDER.to_string(),
        }
    }

    async fn call(
        &self,
        provider: &dyn LlmProvider,
        messages: &[ChatMessage],
    ) -> Result<crate::llm::Completion, LlmError> {
        match tokio::time::timeout(self.timeout, provider.complete(messages)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                provider: provider.name().to_string(),
                after: self.timeout,
            }),
        }
    }

    /// The SQLite write runs on the blocking pool.
    async fn record_usage(&self, usage: Arc<UsageTracker>, provider: &str, tokens: u32) {
        let owned = provider.to_string();
        let result =
            tokio::task::spawn_blocking(move || usage.record(&owned, u64::from(tokens))).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to record usage for {}: {}", provider, e),
            Err(e) => tracing::warn!("Usage recording for {} panicked: {}", provider, e),
        }
    }

    fn bump(&self, provider: &str, f: impl FnOnce(&mut ProviderStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(stats.entry(provider.to_string()).or_default());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::llm::Completion;

    /// What a scripted provider does when called.
    #[derive(Clone)]
    pub(crate) enum Script {
        Reply(&'static str),
        Fail,
        Hang,
    }

    pub(crate) struct ScriptedProvider {
        pub name: &'static str,
        pub script: Script,
        pub invocations: AtomicUsize,
    }

    impl ScriptedProvider {
        pub(crate) fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                invocations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion, LlmError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Reply(text) => Ok(Completion {
                    content: text.to_string(),
                    tokens: 7,
                }),
                Script::Fail => Err(LlmError::RequestFailed {
                    provider: self.name.to_string(),
                    reason: "scripted failure".to_string(),
                }),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    fn chain(providers: &[Arc<ScriptedProvider>]) -> ProviderRouter {
        ProviderRouter::new(
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn LlmProvider>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = ScriptedProvider::new("a", Script::Reply("from a"));
        let b = ScriptedProvider::new("b", Script::Reply("from b"));
        let router = chain(&[a.clone(), b.clone()]);

        let out = router.generate(&[ChatMessage::user("hi")]).await;

        assert_eq!(out.text, "from a");
        assert_eq!(out.provider, "a");
        assert_eq!(b.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_k_failures_then_success() {
        let providers = vec![
            ScriptedProvider::new("p1", Script::Fail),
            ScriptedProvider::new("p2", Script::Fail),
            ScriptedProvider::new("p3", Script::Fail),
            ScriptedProvider::new("p4", Script::Reply("ok")),
            ScriptedProvider::new("p5", Script::Reply("unused")),
        ];
        let router = chain(&providers);

        let out = router.generate(&[ChatMessage::user("hi")]).await;
        assert_eq!(out.provider, "p4");

        let fail = ProviderStats { calls: 0, fails: 1 };
        let ok = ProviderStats { calls: 1, fails: 0 };
        let untouched = ProviderStats::default();
        assert_eq!(
            router.stats(),
            vec![
                ("p1".to_string(), fail),
                ("p2".to_string(), fail),
                ("p3".to_string(), fail),
                ("p4".to_string(), ok),
                ("p5".to_string(), untouched),
            ]
        );
    }

    #[tokio::test]
    async fn test_all_fail_returns_sentinel() {
        let router = chain(&[
            ScriptedProvider::new("a", Script::Fail),
            ScriptedProvider::new("b", Script::Fail),
        ]);

        let out = router.generate(&[ChatMessage::user("hi")]).await;

        assert!(out.is_unavailable());
        assert_eq!(out.text, UNAVAILABLE_REPLY);
        assert_eq!(router.stats_for("a").fails, 1);
        assert_eq!(router.stats_for("b").fails, 1);
    }

    #[tokio::test]
    async fn test_empty_chain_returns_sentinel() {
        let router = ProviderRouter::new(Vec::new());
        let out = router.generate(&[ChatMessage::user("hi")]).await;
        assert_eq!(out.provider, NO_PROVIDER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_times_out() {
        let slow = ScriptedProvider::new("slow", Script::Hang);
        let fast = ScriptedProvider::new("fast", Script::Reply("ok"));
        let router = chain(&[slow, fast]).with_timeout(Duration::from_secs(30));

        let out = router.generate(&[ChatMessage::user("hi")]).await;

        assert_eq!(out.provider, "fast");
        assert_eq!(router.stats_for("slow"), ProviderStats { calls: 0, fails: 1 });
    }

    #[tokio::test]
    async fn test_stats_accumulate_across_calls() {
        let router = chain(&[ScriptedProvider::new("a", Script::Reply("x"))]);
        for _ in 0..3 {
            router.generate(&[ChatMessage::user("hi")]).await;
        }
        assert_eq!(router.stats_for("a").calls, 3);
    }

    #[tokio::test]
    async fn test_success_is_recorded_in_usage() {
        let usage = Arc::new(UsageTracker::open_in_memory().unwrap());
        let router = chain(&[ScriptedProvider::new("groq", Script::Reply("x"))])
            .with_usage_tracker(Arc::clone(&usage));

        router.generate(&[ChatMessage::user("hi")]).await;
        router.generate(&[ChatMessage::user("again")]).await;

        let today = chrono::Local::now().date_naive();
        assert_eq!(usage.daily_total(today, "groq").unwrap(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_generations_all_recorded() {
        let usage = Arc::new(UsageTracker::open_in_memory().unwrap());
        let router = chain(&[ScriptedProvider::new("groq", Script::Reply("x"))])
            .with_usage_tracker(Arc::clone(&usage));

        let messages = [ChatMessage::user("hi")];
        let runs = (0..10).map(|_| router.generate(&messages));
        let generations = futures::future::join_all(runs).await;

        assert!(generations.iter().all(|g| g.provider == "groq"));
        let today = chrono::Local::now().date_naive();
        assert_eq!(usage.daily_total(today, "groq").unwrap(), 10);
        assert_eq!(router.stats_for("groq").calls, 10);
    }
}
