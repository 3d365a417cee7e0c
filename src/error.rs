//! Custom error types for docs-kb

use thiserror::Error;

/// Main error type for docs-kb operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("GitHub error: {0}")]
    GitHub(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Repository '{0}' is already tracked; use 'docs-kb sync {0}' to refresh it")]
    DuplicateRepository(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Invalid repository name '{0}': expected 'owner/repo'")]
    InvalidRepositoryName(String),

    #[error("No matching files found in {repository} on branch {branch}")]
    NoFilesDiscovered { repository: String, branch: String },

    #[error("Duplicate path in manifest: {path}")]
    DuplicatePath { path: String },

    #[error("Failed to fetch {path}: {reason}")]
    FetchFailure { path: String, reason: String },

    #[error("Failed to delete {path} from knowledge base: {reason}")]
    GatewayDeleteFailure { path: String, reason: String },

    #[error("Knowledge base insert failed: {0}")]
    GatewayInsertFailure(String),

    #[error("Manifest update failed: {0}")]
    ManifestUpdateFailure(String),

    #[error("Nothing applied: {failed} of {expected} operations failed")]
    NothingApplied { expected: usize, failed: usize },

    #[error("A sync of {repository} is already running (held by {holder})")]
    SyncInProgress { repository: String, holder: String },

    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for docs-kb
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}
