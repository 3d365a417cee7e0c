//! Qdrant-backed knowledge base
//!
//! Each row is chunked, embedded and stored as one point per chunk. All
//! points of a row share the row key in the id column, so deleting a row is a
//! single filtered delete.

use super::{
    chunk_markdown, chunk_payload, compute_text_hash, hit_from_payload, point_id, CollectionHandle,
    CollectionSchema, KbRow, KnowledgeBase, SearchHit, TextChunk,
};
use crate::config::{ChunkConfig, Config};
use crate::embed::{embed_in_batches, Embedder};
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, GetCollectionInfoResponse, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};

/// Metadata columns with numeric values, indexed as integers
const INTEGER_COLUMNS: &[&str] = &["size"];

/// Qdrant knowledge base handle
pub struct QdrantKnowledgeBase {
    client: Qdrant,
    embedder: Box<dyn Embedder>,
    chunk: ChunkConfig,
    embed_batch_size: usize,
}

impl QdrantKnowledgeBase {
    /// Connect to Qdrant using config
    pub fn connect(config: &Config, embedder: Box<dyn Embedder>) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key(),
            embedder,
            config.chunk.clone(),
            config.embedding.batch_size,
        )
    }

    pub fn new(
        url: &str,
        api_key: Option<String>,
        embedder: Box<dyn Embedder>,
        chunk: ChunkConfig,
        embed_batch_size: usize,
    ) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            embedder,
            chunk,
            embed_batch_size,
        })
    }

    fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    async fn check_dimension(&self, name: &str) -> Result<()> {
        let info = self.client.collection_info(name).await?;
        if let Some(size) = vector_size(&info) {
            if size as usize != self.dimension() {
                return Err(Error::Qdrant(format!(
                    "Collection '{}' has vector size {}, but model '{}' produces {}. Delete and re-ingest the repository to change models.",
                    name,
                    size,
                    self.embedder.model_name(),
                    self.dimension()
                )));
            }
        }
        Ok(())
    }

    async fn create_indexes(&self, name: &str, schema: &CollectionSchema) -> Result<()> {
        let keyword_columns = std::iter::once(schema.id_column).chain(
            schema
                .metadata_columns
                .iter()
                .copied()
                .filter(|c| !INTEGER_COLUMNS.contains(c)),
        );

        for column in keyword_columns {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    name,
                    column,
                    FieldType::Keyword,
                ))
                .await?;
        }

        for column in schema
            .metadata_columns
            .iter()
            .copied()
            .filter(|c| INTEGER_COLUMNS.contains(c))
        {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    name,
                    column,
                    FieldType::Integer,
                ))
                .await?;
        }
        Ok(())
    }
}

fn vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;

    match vectors_config.config.as_ref()? {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(_) => None,
    }
}

#[async_trait]
impl KnowledgeBase for QdrantKnowledgeBase {
    async fn ensure_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<CollectionHandle> {
        if self.client.collection_exists(name).await? {
            debug!("Collection {} already exists", name);
            self.check_dimension(name).await?;
            return Ok(CollectionHandle::new(name, *schema));
        }

        info!(
            "Creating collection {} with dimension {}",
            name,
            self.dimension()
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                    self.dimension() as u64,
                    Distance::Cosine,
                )),
            )
            .await?;
        self.create_indexes(name, schema).await?;

        Ok(CollectionHandle::new(name, *schema))
    }

    async fn insert(&self, handle: &CollectionHandle, rows: Vec<KbRow>) -> Result<()> {
        let prepared = prepare_chunks(&rows, &self.chunk);
        if prepared.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = prepared.iter().map(|(_, _, text)| text.clone()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), texts, self.embed_batch_size).await?;

        let points: Vec<PointStruct> = prepared
            .into_iter()
            .zip(vectors)
            .map(|((row, chunk, _), vector)| {
                PointStruct::new(
                    point_id(&handle.name, &row.id, chunk.index).to_string(),
                    vector,
                    chunk_payload(&handle.schema, row, &chunk),
                )
            })
            .collect();

        debug!(
            "Upserting {} points for {} rows to collection {}",
            points.len(),
            rows.len(),
            handle.name
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(&handle.name, points).wait(true))
            .await?;
        Ok(())
    }

    async fn delete_by_key(&self, handle: &CollectionHandle, key: &str) -> Result<()> {
        debug!("Deleting {} from collection {}", key, handle.name);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&handle.name)
                    .points(Filter::must([Condition::matches(
                        handle.schema.id_column,
                        key.to_string(),
                    )]))
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        handle: &CollectionHandle,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut vectors = self.embedder.embed(vec![query.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::Embedding("No embedding returned for query".to_string()))?;

        debug!("Searching collection {} with limit {}", handle.name, limit);

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&handle.name, vector, limit as u64).with_payload(true),
            )
            .await?;

        Ok(response
            .result
            .into_iter()
            .map(|p| hit_from_payload(&handle.schema, p.score, p.payload))
            .collect())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        if !self.client.collection_exists(name).await? {
            return Ok(false);
        }

        info!("Deleting collection {}", name);
        self.client.delete_collection(name).await?;
        Ok(true)
    }
}

/// Chunks to store for each row, paired with the text to embed.
///
/// A row without content still gets one empty chunk embedded from its key,
/// so every inserted key is present in the collection.
fn prepare_chunks<'r>(
    rows: &'r [KbRow],
    config: &ChunkConfig,
) -> Vec<(&'r KbRow, TextChunk, String)> {
    let mut prepared = Vec::new();

    for row in rows {
        let chunks = chunk_markdown(&row.content, config);
        if chunks.is_empty() {
            debug!("No content to index for {}, storing a placeholder", row.id);
            let placeholder = TextChunk {
                text: String::new(),
                index: 0,
                headings: Vec::new(),
                hash: compute_text_hash(""),
            };
            prepared.push((row, placeholder, row.id.clone()));
            continue;
        }

        for chunk in chunks {
            // Prefix the heading path so section context is embedded too
            let text = if chunk.headings.is_empty() {
                chunk.text.clone()
            } else {
                format!("{}\n\n{}", chunk.headings.join(" > "), chunk.text)
            };
            prepared.push((row, chunk, text));
        }
    }

    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::DOCS_SCHEMA;
    use crate::testing::FixedEmbedder;

    fn row(id: &str, content: &str) -> KbRow {
        KbRow {
            id: id.to_string(),
            content: content.to_string(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_insert_without_rows_makes_no_calls() {
        // Nothing listens on this port; any request would fail
        let kb = QdrantKnowledgeBase::new(
            "http://127.0.0.1:1",
            None,
            Box::new(FixedEmbedder::new(3)),
            ChunkConfig::default(),
            8,
        )
        .unwrap();

        let handle = CollectionHandle::new("kb_empty", DOCS_SCHEMA);
        kb.insert(&handle, Vec::new()).await.unwrap();
    }

    #[test]
    fn test_blank_row_gets_placeholder_chunk() {
        let rows = vec![row("empty.md", "   \n"), row("a.md", "# Intro\n\nHello.")];
        let prepared = prepare_chunks(&rows, &ChunkConfig::default());

        assert_eq!(prepared.len(), 2);
        let (blank, chunk, text) = &prepared[0];
        assert_eq!(blank.id, "empty.md");
        assert_eq!(chunk.index, 0);
        assert!(chunk.text.is_empty());
        assert_eq!(text, "empty.md");

        let (_, chunk, text) = &prepared[1];
        assert_eq!(chunk.headings, vec!["Intro"]);
        assert!(text.starts_with("Intro\n\n"));
    }
}
