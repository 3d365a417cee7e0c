//! Configuration management for docs-kb
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// GitHub access and file discovery
    #[serde(default)]
    pub github: GitHubConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Sync pipeline configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Query configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// GitHub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API root
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Environment variable holding the access token
    #[serde(default = "default_github_token_env")]
    pub token_env: String,

    /// File extensions to track (with leading dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Only track files below this path prefix
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Maximum simultaneous content fetches
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Requests per second across all fetches
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Request timeout in seconds
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,

    /// Retries for transport errors and 5xx responses
    #[serde(default = "default_github_retries")]
    pub retries: usize,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend flavour: "ollama" or "openai"
    #[serde(default = "default_embedding_backend")]
    pub backend: String,

    /// Backend base URL
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,

    /// Overlap characters between chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap_chars: usize,
}

/// Sync pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Branch used when none is given
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Files per knowledge base insert call
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,

    /// Seconds after which a held sync lock may be taken over
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Default number of results
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,

    /// Maximum results allowed
    #[serde(default = "default_query_max_limit")]
    pub max_limit: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for docs-kb data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            github: GitHubConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunk: ChunkConfig::default(),
            sync: SyncConfig::default(),
            query: QueryConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token_env: default_github_token_env(),
            extensions: default_extensions(),
            path_prefix: None,
            max_concurrent: default_max_concurrent(),
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_github_timeout(),
            retries: default_github_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_max_chars(),
            overlap_chars: default_chunk_overlap(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            insert_batch_size: default_insert_batch_size(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
            max_limit: default_query_max_limit(),
        }
    }
}

impl GitHubConfig {
    /// Read the access token from the configured environment variable
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

impl Config {
    /// Get the default base directory (~/.docs-kb)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docs-kb")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn paths_for(base: PathBuf, config_file: PathBuf) -> PathsConfig {
        PathsConfig {
            config_file,
            db_file: base.join("docs_kb.db"),
            base_dir: base,
        }
    }

    /// Load configuration from a config file path; a missing file yields defaults
    /// rooted next to where the file would be.
    pub fn load(config_path: &Path) -> Result<Self> {
        let base = config_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();

        let mut config = if config_path.exists() {
            debug!("Loading config from {:?}", config_path);
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            debug!("No config file at {:?}, using defaults", config_path);
            Config::default()
        };

        config.paths = Self::paths_for(base, config_path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at the given base directory
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        let config_file = base_dir.join("config.toml");
        Self {
            paths: Self::paths_for(base_dir, config_file),
            ..Self::default()
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        std::env::var(&self.qdrant_api_key_env).ok()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.github.max_concurrent == 0 {
            return Err(Error::Config(
                "github.max_concurrent must be at least 1".to_string(),
            ));
        }

        if self.github.requests_per_second == 0 {
            return Err(Error::Config(
                "github.requests_per_second must be positive".to_string(),
            ));
        }

        if self.github.extensions.is_empty() {
            return Err(Error::Config(
                "github.extensions must list at least one extension".to_string(),
            ));
        }

        if let Some(ext) = self.github.extensions.iter().find(|e| !e.starts_with('.')) {
            return Err(Error::Config(format!(
                "github.extensions entry '{}' must start with '.'",
                ext
            )));
        }

        if self.embedding.batch_size == 0 || self.sync.insert_batch_size == 0 {
            return Err(Error::Config("batch sizes must be at least 1".to_string()));
        }

        if self.chunk.overlap_chars >= self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.overlap_chars must be < chunk.max_chars".to_string(),
            ));
        }

        if self.query.default_limit > self.query.max_limit {
            return Err(Error::Config(
                "query.default_limit must be <= query.max_limit".to_string(),
            ));
        }

        Ok(())
    }
}
