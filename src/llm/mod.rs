//! LLM integration.
//!
//! Every remote backend speaks the OpenAI chat completions dialect; the local
//! fallback is Ollama. [`ProviderRouter`] strings them together.

mod ollama;
mod openai_compat;
mod provider;
pub mod router;

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ChatMessage, Completion, LlmProvider, Role};
pub use router::{Generation, NO_PROVIDER, ProviderRouter, ProviderStats, UNAVAILABLE_REPLY};

use std::sync::Arc;

use crate::config::LlmConfig;

/// Build the provider chain in fallback order: configured remotes first, local last.
pub fn create_providers(config: &LlmConfig) -> Vec<Arc<dyn LlmProvider>> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    for remote in &config.remote {
        match OpenAiCompatProvider::new(remote.clone()) {
            Ok(provider) => {
                tracing::info!("Using {} ({})", remote.name, remote.model);
                providers.push(Arc::new(provider));
            }
            Err(e) => tracing::warn!("Skipping provider {}: {}", remote.name, e),
        }
    }

    if config.ollama.enabled {
        tracing::info!("Using local Ollama ({}) as last resort", config.ollama.model);
        providers.push(Arc::new(OllamaProvider::new(config.ollama.clone())));
    }

    if providers.is_empty() {
        tracing::warn!("No generation providers configured; every request will get the unavailable reply");
    }

    providers
}
