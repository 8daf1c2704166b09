//! Configuration for kvclaw.
//!
//! Everything is read from the process environment (after `.env` has been
//! loaded by `dotenvy`). A missing provider credential removes that provider
//! from the fallback chain; it never fails startup.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::agent::{SchedulerConfig, WatchdogConfig};
use crate::error::ConfigError;
use crate::usage::ProviderLimit;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub usage: UsageConfig,
    pub skills: SkillsConfig,
    pub activity: ActivityConfig,
    pub scheduler: SchedulerConfig,
    pub watchdog: WatchdogConfig,
    pub http: Option<HttpConfig>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let data_dir = match env.optional("KVCLAW_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .map(|home| home.join(".kvclaw"))
                .ok_or(ConfigError::NoDataDir)?,
        };

        Ok(Self {
            agent: AgentConfig::resolve(&env)?,
            llm: LlmConfig::resolve(&env)?,
            memory: MemoryConfig::resolve(&env, &data_dir)?,
            usage: UsageConfig::resolve(&env, &data_dir)?,
            skills: SkillsConfig::resolve(&env, &data_dir)?,
            activity: ActivityConfig::resolve(&env, &data_dir)?,
            scheduler: resolve_scheduler(&env)?,
            watchdog: resolve_watchdog(&env)?,
            http: HttpConfig::resolve(&env)?,
            data_dir,
        })
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name the agent introduces itself with.
    pub name: String,
    /// The single authorized user. Messages from anyone else are ignored.
    pub user_id: String,
    /// Capacity of the short-term conversation window.
    pub history_capacity: usize,
    /// Assistant replies are truncated to this many chars before entering the window.
    pub history_reply_chars: usize,
    /// Hard timeout for a single plugin execution.
    pub plugin_timeout: Duration,
    /// How often the idle loop refreshes the heartbeat.
    pub idle_beat_interval: Duration,
    /// Attempts per outbound reply chunk.
    pub reply_retries: u32,
    /// Fixed delay between reply attempts.
    pub reply_backoff: Duration,
    /// Replies longer than this are split into chunks.
    pub max_reply_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "kvclaw".to_string(),
            user_id: "local".to_string(),
            history_capacity: 10,
            history_reply_chars: 500,
            plugin_timeout: Duration::from_secs(30),
            idle_beat_interval: Duration::from_secs(30),
            reply_retries: 3,
            reply_backoff: Duration::from_secs(2),
            max_reply_chars: 4000,
        }
    }
}

impl AgentConfig {
    fn resolve(env: &Env<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            name: env.optional("KVCLAW_NAME").unwrap_or(defaults.name),
            user_id: env.optional("KVCLAW_USER_ID").unwrap_or(defaults.user_id),
            history_capacity: env.parse("KVCLAW_HISTORY_CAPACITY", defaults.history_capacity)?,
            history_reply_chars: defaults.history_reply_chars,
            plugin_timeout: env.secs("KVCLAW_PLUGIN_TIMEOUT_SECS", defaults.plugin_timeout)?,
            idle_beat_interval: defaults.idle_beat_interval,
            reply_retries: env.parse("KVCLAW_REPLY_RETRIES", defaults.reply_retries)?,
            reply_backoff: defaults.reply_backoff,
            max_reply_chars: defaults.max_reply_chars,
        })
    }
}

/// A remote OpenAI-compatible chat completions backend.
#[derive(Debug, Clone)]
pub struct RemoteProviderConfig {
    /// Short provider name used in stats and usage rows (e.g. "groq").
    pub name: String,
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Local Ollama fallback.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
        }
    }
}

/// Generation provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Remote providers in fallback order. Only providers with a credential appear.
    pub remote: Vec<RemoteProviderConfig>,
    pub ollama: OllamaConfig,
    /// Hard timeout applied by the router to every provider call.
    pub request_timeout: Duration,
}

impl LlmConfig {
    fn resolve(env: &Env<'_>) -> Result<Self, ConfigError> {
        // Fixed priority: fast remote first, then backups.
        let known = [
            (
                "groq",
                "GROQ",
                "https://api.groq.com/openai/v1",
                "llama-3.3-70b-versatile",
            ),
            (
                "gemini",
                "GEMINI",
                "https://generativelanguage.googleapis.com/v1beta/openai",
                "gemini-2.0-flash",
            ),
            (
                "mistral",
                "MISTRAL",
                "https://api.mistral.ai/v1",
                "mistral-small-latest",
            ),
        ];

        let mut remote = Vec::new();
        for (name, prefix, base_url, model) in known {
            let Some(key) = env.optional(&format!("{prefix}_API_KEY")) else {
                tracing::debug!(provider = name, "No credential, provider disabled");
                continue;
            };
            remote.push(RemoteProviderConfig {
                name: name.to_string(),
                api_key: SecretString::from(key),
                base_url: env
                    .optional(&format!("{prefix}_BASE_URL"))
                    .unwrap_or_else(|| base_url.to_string()),
                model: env
                    .optional(&format!("{prefix}_MODEL"))
                    .unwrap_or_else(|| model.to_string()),
                max_tokens: 1024,
            });
        }

        let defaults = OllamaConfig::default();
        let ollama = OllamaConfig {
            enabled: env.parse("OLLAMA_ENABLED", defaults.enabled)?,
            base_url: env.optional("OLLAMA_BASE_URL").unwrap_or(defaults.base_url),
            model: env.optional("OLLAMA_MODEL").unwrap_or(defaults.model),
        };

        Ok(Self {
            remote,
            ollama,
            request_timeout: env.secs("KVCLAW_LLM_TIMEOUT_SECS", Duration::from_secs(30))?,
        })
    }
}

/// Remote embedding endpoint (OpenAI-compatible).
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
}

/// Long-term memory settings.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub db_path: PathBuf,
    /// Facts retrieved per message.
    pub fact_results: usize,
    /// Past conversation snippets retrieved per message.
    pub conversation_results: usize,
    /// Dimension of the local hashed embeddings.
    pub hashed_dimension: usize,
    /// When present, embeddings come from this endpoint instead of local hashing.
    pub remote: Option<RemoteEmbeddingConfig>,
}

impl MemoryConfig {
    fn resolve(env: &Env<'_>, data_dir: &Path) -> Result<Self, ConfigError> {
        let remote = match env.optional("EMBEDDING_API_KEY") {
            Some(key) => Some(RemoteEmbeddingConfig {
                api_key: SecretString::from(key),
                base_url: env
                    .optional("EMBEDDING_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: env
                    .optional("EMBEDDING_MODEL")
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
                dimension: env.parse("EMBEDDING_DIMENSION", 1536)?,
            }),
            None => None,
        };

        Ok(Self {
            db_path: data_dir.join("memory.db"),
            fact_results: env.parse("KVCLAW_FACT_RESULTS", 3)?,
            conversation_results: env.parse("KVCLAW_CONVERSATION_RESULTS", 4)?,
            hashed_dimension: 256,
            remote,
        })
    }
}

/// Usage tracker settings.
#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub db_path: PathBuf,
    pub limits: Vec<ProviderLimit>,
    /// Share of a daily limit at which warnings start.
    pub warn_ratio: f64,
}

impl UsageConfig {
    /// Built-in daily limits, with the database under `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            db_path: data_dir.join("usage.db"),
            limits: vec![
                ProviderLimit::daily("groq", "Groq (llama-3.3-70b)", 14_400),
                ProviderLimit::daily("gemini", "Gemini (gemini-2.0-flash)", 1_500),
                ProviderLimit::daily("mistral", "Mistral (mistral-small)", 500),
                ProviderLimit::unlimited("ollama", "Local Ollama"),
            ],
            warn_ratio: 0.8,
        }
    }

    fn resolve(env: &Env<'_>, data_dir: &Path) -> Result<Self, ConfigError> {
        let limits = vec![
            ProviderLimit::daily("groq", "Groq (llama-3.3-70b)", env.parse("GROQ_DAILY_LIMIT", 14_400)?),
            ProviderLimit::daily("gemini", "Gemini (gemini-2.0-flash)", env.parse("GEMINI_DAILY_LIMIT", 1_500)?),
            ProviderLimit::daily("mistral", "Mistral (mistral-small)", env.parse("MISTRAL_DAILY_LIMIT", 500)?),
            ProviderLimit::unlimited("ollama", "Local Ollama"),
        ];
        Ok(Self {
            db_path: data_dir.join("usage.db"),
            limits,
            warn_ratio: 0.8,
        })
    }
}

/// Settings for built-in actions and bundled plugins.
#[derive(Debug, Clone)]
pub struct SkillsConfig {
    pub notes_path: PathBuf,
    /// Where generated Python is written before it runs.
    pub code_dir: PathBuf,
    /// Roots scanned for git repositories.
    pub git_roots: Vec<PathBuf>,
    pub git_max_depth: usize,
    /// Timeout for shell-level execution.
    pub command_timeout: Duration,
    pub search_base_url: String,
}

impl SkillsConfig {
    /// Defaults rooted at a data directory.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            notes_path: data_dir.join("notes.md"),
            code_dir: data_dir.join("code"),
            git_roots: dirs::home_dir().into_iter().collect(),
            git_max_depth: 4,
            command_timeout: Duration::from_secs(30),
            search_base_url: "https://api.duckduckgo.com".to_string(),
        }
    }

    fn resolve(env: &Env<'_>, data_dir: &Path) -> Result<Self, ConfigError> {
        let mut skills = Self::in_dir(data_dir);
        if let Some(path) = env.optional("KVCLAW_NOTES_PATH") {
            skills.notes_path = PathBuf::from(path);
        }
        if let Some(roots) = env.optional("KVCLAW_GIT_ROOTS") {
            skills.git_roots = std::env::split_paths(&roots).collect();
        }
        skills.git_max_depth = env.parse("KVCLAW_GIT_MAX_DEPTH", skills.git_max_depth)?;
        skills.command_timeout = env.secs("KVCLAW_COMMAND_TIMEOUT_SECS", skills.command_timeout)?;
        Ok(skills)
    }
}

/// Changelog and machine-health history.
#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub changelog_db: PathBuf,
    pub health_db: PathBuf,
    /// Folders scanned for edited files and git repositories.
    pub watch_folders: Vec<PathBuf>,
    /// How far below a watched folder repositories are looked for.
    pub repo_depth: usize,
    /// Health history older than this is pruned.
    pub retention: Duration,
}

impl ActivityConfig {
    pub fn in_dir(data_dir: &Path) -> Self {
        let watch_folders = match dirs::home_dir() {
            Some(home) => ["code", "projects", "Documents", "Desktop"]
                .iter()
                .map(|d| home.join(d))
                .collect(),
            None => Vec::new(),
        };
        Self {
            changelog_db: data_dir.join("changelog.db"),
            health_db: data_dir.join("syswhisper.db"),
            watch_folders,
            repo_depth: 2,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    fn resolve(env: &Env<'_>, data_dir: &Path) -> Result<Self, ConfigError> {
        let mut activity = Self::in_dir(data_dir);
        if let Some(folders) = env.optional("KVCLAW_WATCH_FOLDERS") {
            activity.watch_folders = std::env::split_paths(&folders).collect();
        }
        activity.repo_depth = env.parse("KVCLAW_WATCH_REPO_DEPTH", activity.repo_depth)?;
        let days = env.parse("KVCLAW_HEALTH_RETENTION_DAYS", 7u64)?;
        activity.retention = Duration::from_secs(days * 24 * 60 * 60);
        Ok(activity)
    }
}

/// HTTP webhook channel.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub webhook_secret: Option<SecretString>,
    /// Messages arriving over HTTP are attributed to this user.
    pub user_id: String,
}

impl HttpConfig {
    fn resolve(env: &Env<'_>) -> Result<Option<Self>, ConfigError> {
        let Some(secret) = env.optional("KVCLAW_HTTP_SECRET") else {
            return Ok(None);
        };
        Ok(Some(Self {
            host: env
                .optional("KVCLAW_HTTP_HOST")
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env.parse("KVCLAW_HTTP_PORT", 8765)?,
            webhook_secret: Some(SecretString::from(secret)),
            user_id: env
                .optional("KVCLAW_USER_ID")
                .unwrap_or_else(|| "local".to_string()),
        }))
    }
}

fn resolve_scheduler(env: &Env<'_>) -> Result<SchedulerConfig, ConfigError> {
    let defaults = SchedulerConfig::default();
    Ok(SchedulerConfig {
        enabled: env.parse("KVCLAW_SCHEDULER_ENABLED", defaults.enabled)?,
        cpu_threshold: env.parse("KVCLAW_CPU_ALERT_PERCENT", defaults.cpu_threshold)?,
        ram_threshold: env.parse("KVCLAW_RAM_ALERT_PERCENT", defaults.ram_threshold)?,
        disk_threshold: env.parse("KVCLAW_DISK_ALERT_PERCENT", defaults.disk_threshold)?,
        morning_digest: env
            .optional("KVCLAW_MORNING_CRON")
            .unwrap_or(defaults.morning_digest),
        evening_digest: env
            .optional("KVCLAW_EVENING_CRON")
            .unwrap_or(defaults.evening_digest),
        ..defaults
    })
}

fn resolve_watchdog(env: &Env<'_>) -> Result<WatchdogConfig, ConfigError> {
    let defaults = WatchdogConfig::default();
    Ok(WatchdogConfig {
        enabled: env.parse("KVCLAW_WATCHDOG_ENABLED", defaults.enabled)?,
        check_interval: env.secs("KVCLAW_WATCHDOG_INTERVAL_SECS", defaults.check_interval)?,
        threshold: env.secs("KVCLAW_WATCHDOG_THRESHOLD_SECS", defaults.threshold)?,
    })
}

/// Thin wrapper around a key lookup with typed accessors.
struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse(key, default.as_secs())?;
        Ok(Duration::from_secs(secs))
    }
}
