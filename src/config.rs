//! TOML configuration.
//!
//! Every section is optional; `Config::default()` describes a server on
//! `127.0.0.1:8080` talking to a local Ollama, with embeddings disabled and
//! an in-memory collection store.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [conduit]
//! provider = "ollama"
//! url = "http://localhost:11434"
//! dispatch = "async"        # or "pool"
//! max_concurrency = 8
//! item_timeout_secs = 120
//! cache_max_entries = 1024  # response cache size, 0 disables
//!
//! [embeddings]
//! provider = "ollama"
//! models = ["nomic-embed-text"]
//!
//! [collections]
//! backend = "sqlite"
//! path = "./data/collections.sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub conduit: ConduitConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub siphon: SiphonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Generation backend and batch execution settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ConduitConfig {
    /// `ollama`, `openai`, or `disabled`.
    #[serde(default = "default_conduit_provider")]
    pub provider: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    /// `async` awaits the backend directly; `pool` runs blocking calls on
    /// the blocking thread pool.
    #[serde(default = "default_dispatch")]
    pub dispatch: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Deadline for a single batch item.
    #[serde(default)]
    pub item_timeout_secs: Option<u64>,
    /// Deadline for a whole batch.
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,
    /// HTTP timeout for one backend request.
    #[serde(default = "default_conduit_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_conduit_max_retries")]
    pub max_retries: u32,
    /// Model pinged by `GET /status`; skipped when unset.
    #[serde(default)]
    pub status_model: Option<String>,
    /// Responses kept by the `use_cache` response cache; 0 disables it.
    #[serde(default = "default_conduit_cache_max_entries")]
    pub cache_max_entries: usize,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            provider: default_conduit_provider(),
            url: default_ollama_url(),
            dispatch: default_dispatch(),
            max_concurrency: default_max_concurrency(),
            item_timeout_secs: None,
            batch_timeout_secs: None,
            timeout_secs: default_conduit_timeout_secs(),
            max_retries: default_conduit_max_retries(),
            status_model: None,
            cache_max_entries: default_conduit_cache_max_entries(),
        }
    }
}

impl ConduitConfig {
    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_secs.map(Duration::from_secs)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

fn default_conduit_provider() -> String {
    "ollama".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_dispatch() -> String {
    "async".to_string()
}
fn default_conduit_cache_max_entries() -> usize {
    1024
}
fn default_max_concurrency() -> usize {
    8
}
fn default_conduit_timeout_secs() -> u64 {
    300
}
fn default_conduit_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingsConfig {
    /// `ollama`, `openai`, `local`, or `disabled`.
    #[serde(default = "default_embeddings_provider")]
    pub provider: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    /// Models clients may request.
    #[serde(default)]
    pub models: Vec<String>,
    /// Used when a request names no model; defaults to the first entry of `models`.
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embeddings_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embeddings_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embeddings_provider(),
            url: default_ollama_url(),
            models: Vec::new(),
            default_model: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embeddings_timeout_secs(),
            max_retries: default_embeddings_max_retries(),
        }
    }
}

impl EmbeddingsConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn resolved_default_model(&self) -> Option<&str> {
        self.default_model
            .as_deref()
            .or_else(|| self.models.first().map(String::as_str))
    }
}

fn default_embeddings_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embeddings_timeout_secs() -> u64 {
    30
}
fn default_embeddings_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionsConfig {
    /// `memory` or `sqlite`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiphonConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    /// Let `file_path` requests without uploaded data read the server's filesystem.
    #[serde(default)]
    pub allow_local_paths: bool,
    /// Model used by the `enrich` action.
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Payloads kept by the `use_cache` payload cache; 0 disables it.
    #[serde(default = "default_siphon_cache_max_entries")]
    pub cache_max_entries: usize,
}

impl Default for SiphonConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            chunk_max_tokens: default_chunk_max_tokens(),
            allow_local_paths: false,
            summary_model: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            cache_max_entries: default_siphon_cache_max_entries(),
        }
    }
}

fn default_max_bytes() -> usize {
    25 * 1024 * 1024
}
fn default_chunk_max_tokens() -> usize {
    700
}
fn default_siphon_cache_max_entries() -> usize {
    256
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `HEADWATER_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // Conduit
        match self.conduit.provider.as_str() {
            "ollama" | "openai" | "disabled" => {}
            other => bail!(
                "Unknown conduit provider: '{}'. Must be ollama, openai, or disabled.",
                other
            ),
        }
        match self.conduit.dispatch.as_str() {
            "async" | "pool" => {}
            other => bail!("Unknown conduit dispatch: '{}'. Must be async or pool.", other),
        }
        if self.conduit.max_concurrency == 0 {
            bail!("conduit.max_concurrency must be >= 1");
        }
        if self.conduit.item_timeout_secs == Some(0) {
            bail!("conduit.item_timeout_secs must be > 0 when set");
        }
        if self.conduit.batch_timeout_secs == Some(0) {
            bail!("conduit.batch_timeout_secs must be > 0 when set");
        }
        if self.conduit.timeout_secs == 0 {
            bail!("conduit.timeout_secs must be > 0");
        }

        // Embeddings
        match self.embeddings.provider.as_str() {
            "disabled" | "ollama" | "openai" | "local" => {}
            other => bail!(
                "Unknown embeddings provider: '{}'. Must be disabled, ollama, openai, or local.",
                other
            ),
        }
        if self.embeddings.is_enabled() {
            if self.embeddings.models.is_empty() {
                bail!(
                    "embeddings.models must list at least one model when provider is '{}'",
                    self.embeddings.provider
                );
            }
            if let Some(default) = &self.embeddings.default_model {
                if !self.embeddings.models.contains(default) {
                    bail!(
                        "embeddings.default_model '{}' is not in embeddings.models",
                        default
                    );
                }
            }
            if self.embeddings.batch_size == 0 {
                bail!("embeddings.batch_size must be > 0");
            }
        }

        // Collections
        match self.collections.backend.as_str() {
            "memory" => {}
            "sqlite" => {
                if self.collections.path.is_none() {
                    bail!("collections.path is required when backend is 'sqlite'");
                }
            }
            other => bail!(
                "Unknown collections backend: '{}'. Must be memory or sqlite.",
                other
            ),
        }

        // Siphon
        if self.siphon.max_bytes == 0 {
            bail!("siphon.max_bytes must be > 0");
        }
        if self.siphon.chunk_max_tokens == 0 {
            bail!("siphon.chunk_max_tokens must be > 0");
        }

        // Logging
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => bail!("Unknown logging format: '{}'. Must be text or json.", other),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load `path` when given, otherwise fall back to defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => Ok(Config::default()),
    }
}
