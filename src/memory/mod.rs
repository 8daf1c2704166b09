//! Short-term window and long-term searchable memory.

mod embeddings;
mod store;
mod window;

pub use embeddings::{
    EmbeddingError, EmbeddingProvider, HashedEmbeddings, OpenAiEmbeddings, cosine_similarity,
};
pub use store::{LongTermMemory, MemoryCategory, MemoryRecord, ScoredRecord};
pub use window::ConversationWindow;

use std::sync::Arc;

use crate::config::MemoryConfig;

/// Pick the embedding provider for the configured memory.
pub fn create_embeddings(config: &MemoryConfig) -> Arc<dyn EmbeddingProvider> {
    match &config.remote {
        Some(remote) => {
            tracing::info!("Using remote embeddings ({})", remote.model);
            Arc::new(OpenAiEmbeddings::new(remote))
        }
        None => Arc::new(HashedEmbeddings::new(config.hashed_dimension)),
    }
}
