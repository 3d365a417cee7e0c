//! Knowledge base gateway
//!
//! One collection per repository branch. Rows are keyed by file path and
//! carry the file's manifest metadata next to its content.

mod chunk;
mod payload;
mod qdrant;

pub use chunk::*;
pub use payload::*;
pub use qdrant::*;

use crate::error::Result;
use crate::remote::LoadedFile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column layout of a knowledge base collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Column holding the row key
    pub id_column: &'static str,
    /// Keyword metadata columns
    pub metadata_columns: &'static [&'static str],
    /// Column holding the searchable text
    pub content_column: &'static str,
}

/// Schema for repository documentation collections
pub const DOCS_SCHEMA: CollectionSchema = CollectionSchema {
    id_column: "id",
    metadata_columns: &["repository", "branch", "path", "name", "size", "sha"],
    content_column: "content",
};

/// An ensured collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub name: String,
    pub schema: CollectionSchema,
}

impl CollectionHandle {
    pub fn new(name: impl Into<String>, schema: CollectionSchema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// A row to insert, keyed by `id`
#[derive(Debug, Clone, PartialEq)]
pub struct KbRow {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl KbRow {
    /// Row for a fetched documentation file
    pub fn for_file(repository: &str, branch: &str, file: &LoadedFile) -> Self {
        let entry = &file.entry;
        let mut metadata = Map::new();
        metadata.insert("repository".to_string(), Value::from(repository));
        metadata.insert("branch".to_string(), Value::from(branch));
        metadata.insert("path".to_string(), Value::from(entry.path.as_str()));
        metadata.insert("name".to_string(), Value::from(entry.name.as_str()));
        metadata.insert("size".to_string(), Value::from(entry.size));
        metadata.insert("sha".to_string(), Value::from(entry.sha.as_str()));

        Self {
            id: entry.path.clone(),
            content: file.content.clone(),
            metadata,
        }
    }
}

/// A search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Row key (file path)
    pub id: String,
    pub score: f32,
    /// Matching chunk text
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// Insert, delete and search operations against the search index
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Create the collection if it does not exist
    async fn ensure_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<CollectionHandle>;

    /// Insert rows; a row replaces nothing, so delete old versions first
    async fn insert(&self, handle: &CollectionHandle, rows: Vec<KbRow>) -> Result<()>;

    /// Remove every fragment stored under `key`
    async fn delete_by_key(&self, handle: &CollectionHandle, key: &str) -> Result<()>;

    async fn search(
        &self,
        handle: &CollectionHandle,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Drop a collection. Returns false if it did not exist.
    async fn drop_collection(&self, name: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileEntry;

    #[test]
    fn test_row_for_file_carries_manifest_metadata() {
        let file = LoadedFile {
            entry: FileEntry::new("docs/guide.md", 42, "abc123"),
            content: "# Guide".to_string(),
        };

        let row = KbRow::for_file("octo/docs", "main", &file);

        assert_eq!(row.id, "docs/guide.md");
        assert_eq!(row.content, "# Guide");
        for column in DOCS_SCHEMA.metadata_columns {
            assert!(row.metadata.contains_key(*column), "missing {column}");
        }
        assert_eq!(row.metadata["name"], "guide.md");
        assert_eq!(row.metadata["size"], 42);
    }
}
