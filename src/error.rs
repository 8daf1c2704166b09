//! Error types for kvclaw.
//!
//! Each concern gets its own enum so callers can tell failure causes apart.
//! Everything below the orchestration loop is eventually rendered as a
//! user-visible string; only the watchdog is allowed to end the process.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] crate::plugins::PluginError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Could not determine a data directory (set KVCLAW_DATA_DIR)")]
    NoDataDir,
}

/// Errors from generation providers.
///
/// The router treats every variant the same way (count a failure, try the
/// next provider); the variants exist so logs and tests can see the cause.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} authentication failed")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },
}

impl LlmError {
    /// Name of the provider that produced this error.
    pub fn provider(&self) -> &str {
        match self {
            Self::RequestFailed { provider, .. }
            | Self::AuthFailed { provider }
            | Self::RateLimited { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::Timeout { provider, .. } => provider,
        }
    }
}

/// Persistence errors for the SQLite-backed stores.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: String, reason: String },
}

/// Long-term memory errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] crate::memory::EmbeddingError),
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Database(DatabaseError::Sqlite(e))
    }
}

/// Channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} health check failed")]
    HealthCheckFailed { name: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
