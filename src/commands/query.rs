//! Query command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::kb::{CollectionHandle, KnowledgeBase, SearchHit, DOCS_SCHEMA};
use crate::manifest::ManifestStore;
use serde::Serialize;
use tracing::info;

/// Query result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub repository: String,
    pub branch: String,
    pub query: String,
    pub hits: Vec<SearchHit>,
}

/// Clamp a requested result count to `[1, max_limit]`
pub fn effective_limit(config: &Config, limit: Option<usize>) -> usize {
    limit
        .unwrap_or(config.query.default_limit)
        .clamp(1, config.query.max_limit.max(1))
}

/// Search a tracked repository's knowledge base
pub async fn cmd_query(
    config: &Config,
    store: &ManifestStore,
    kb: &dyn KnowledgeBase,
    name: &str,
    query: &str,
    limit: Option<usize>,
) -> Result<QueryResult> {
    let record = store
        .get(name)
        .await?
        .ok_or_else(|| Error::RepositoryNotFound(name.to_string()))?;

    info!("Querying {}: {}", record.name, query);

    let handle = CollectionHandle::new(record.knowledge_base_name.as_str(), DOCS_SCHEMA);
    let hits = kb
        .search(&handle, query, effective_limit(config, limit))
        .await?;

    Ok(QueryResult {
        repository: record.name,
        branch: record.branch,
        query: query.to_string(),
        hits,
    })
}

/// Print query results to console
pub fn print_query_results(result: &QueryResult) {
    println!("\n🔍 Query: {} ({})\n", result.query, result.repository);
    println!("Found {} results:\n", result.hits.len());

    for (i, hit) in result.hits.iter().enumerate() {
        println!("{}. [score: {:.3}] {}", i + 1, hit.score, hit.id);

        if let Some(headings) = hit
            .metadata
            .get(crate::kb::HEADINGS_FIELD)
            .and_then(|h| h.as_array())
        {
            let path: Vec<&str> = headings.iter().filter_map(|h| h.as_str()).collect();
            if !path.is_empty() {
                println!("   Section: {}", path.join(" > "));
            }
        }

        let text = hit.content.trim();
        let preview = match text.char_indices().nth(200) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.to_string(),
        };
        println!("   {}\n", preview.replace('\n', " "));
    }
}
