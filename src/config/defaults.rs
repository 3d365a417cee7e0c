//! Default values for configuration

/// Default Qdrant URL (gRPC port) for local development
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

/// Default GitHub REST API root
pub fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

/// Default environment variable holding the GitHub token
pub fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// Documentation file extensions tracked by default
pub fn default_extensions() -> Vec<String> {
    vec![".md".to_string(), ".mdx".to_string()]
}

/// Default cap on simultaneous content fetches
pub fn default_max_concurrent() -> usize {
    20
}

/// Default request pacing against the GitHub API
pub fn default_requests_per_second() -> u32 {
    10
}

/// Default request timeout in seconds
pub fn default_github_timeout() -> u64 {
    30
}

/// Default retry count for transient GitHub failures
pub fn default_github_retries() -> usize {
    2
}

/// Default user agent (GitHub rejects requests without one)
pub fn default_user_agent() -> String {
    format!("docs-kb/{}", env!("CARGO_PKG_VERSION"))
}

/// Default embedding backend flavour
pub fn default_embedding_backend() -> String {
    "ollama".to_string()
}

/// Default embedding backend URL (local Ollama)
pub fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

/// Default embedding dimension for nomic-embed-text
pub fn default_embedding_dimension() -> usize {
    768
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default maximum characters per chunk
pub fn default_chunk_max_chars() -> usize {
    1500
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default branch for new repositories
pub fn default_branch() -> String {
    "main".to_string()
}

/// Default number of files per knowledge base insert
pub fn default_insert_batch_size() -> usize {
    50
}

/// Default age after which a sync lock is considered abandoned
pub fn default_lock_ttl_secs() -> u64 {
    3600
}

/// Default number of query results
pub fn default_query_limit() -> usize {
    10
}

/// Default maximum query results
pub fn default_query_max_limit() -> usize {
    50
}
