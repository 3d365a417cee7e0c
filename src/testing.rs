//! Test doubles that record every call

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::kb::{CollectionHandle, CollectionSchema, KbRow, KnowledgeBase, SearchHit};
use crate::manifest::FileEntry;
use crate::remote::{ContentFetcher, FailedFetch, FetchOutcome, FileFilter, LoadedFile, RemoteLister};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Body served for a file by [`RecordingFetcher`]
pub fn body_for(entry: &FileEntry) -> String {
    format!("# {}\n\nContents of {} at {}.", entry.name, entry.path, entry.sha)
}

/// Lister returning a fixed manifest
#[derive(Default)]
pub struct StaticLister {
    files: Vec<FileEntry>,
    fail: bool,
}

impl StaticLister {
    pub fn new(files: &[FileEntry]) -> Self {
        Self {
            files: files.to_vec(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            files: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl RemoteLister for StaticLister {
    async fn list_files(
        &self,
        repository: &str,
        _branch: &str,
        filter: &FileFilter,
    ) -> Result<Vec<FileEntry>> {
        if self.fail {
            return Err(Error::GitHub(format!("listing {} refused", repository)));
        }
        Ok(self
            .files
            .iter()
            .filter(|f| filter.matches(&f.path))
            .cloned()
            .collect())
    }
}

/// Fetcher serving known entries and recording requested paths
#[derive(Default)]
pub struct RecordingFetcher {
    files: HashMap<String, FileEntry>,
    failing: HashSet<String>,
    requested: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    pub fn with_files(files: &[FileEntry]) -> Self {
        Self {
            files: files.iter().map(|f| (f.path.clone(), f.clone())).collect(),
            ..Self::default()
        }
    }

    pub fn failing(mut self, paths: &[&str]) -> Self {
        self.failing.extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentFetcher for RecordingFetcher {
    async fn fetch_file(&self, _repository: &str, _branch: &str, path: &str) -> Result<LoadedFile> {
        self.requested.lock().unwrap().push(path.to_string());
        match self.files.get(path) {
            Some(entry) if !self.failing.contains(path) => Ok(LoadedFile {
                entry: entry.clone(),
                content: body_for(entry),
            }),
            _ => Err(Error::FetchFailure {
                path: path.to_string(),
                reason: "HTTP 404".to_string(),
            }),
        }
    }

    async fn fetch_files(
        &self,
        repository: &str,
        branch: &str,
        paths: &[String],
        _max_concurrent: usize,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        for path in paths {
            match self.fetch_file(repository, branch, path).await {
                Ok(file) => outcome.loaded.push(file),
                Err(e) => outcome.failed.push(FailedFetch {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        outcome
    }
}

/// A knowledge base call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KbCall {
    Ensure(String),
    Insert(Vec<String>),
    Delete(String),
    Search(String),
    Drop(String),
}

/// In-memory knowledge base recording every call
#[derive(Default)]
pub struct RecordingKb {
    calls: Mutex<Vec<KbCall>>,
    rows: Mutex<BTreeMap<String, KbRow>>,
    inserted: Mutex<Vec<String>>,
    failing_deletes: HashSet<String>,
    insert_successes: Option<usize>,
    fail_drop: bool,
}

impl RecordingKb {
    pub fn failing_deletes(mut self, paths: &[&str]) -> Self {
        self.failing_deletes
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    /// Let the first `n` insert calls succeed and fail the rest
    pub fn failing_insert_after(mut self, n: usize) -> Self {
        self.insert_successes = Some(n);
        self
    }

    pub fn failing_drop(mut self) -> Self {
        self.fail_drop = true;
        self
    }

    pub fn calls(&self) -> Vec<KbCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Keys of every successfully inserted row, in order
    pub fn inserted_keys(&self) -> Vec<String> {
        self.inserted.lock().unwrap().clone()
    }

    /// Keys currently held
    pub fn keys(&self) -> Vec<String> {
        self.rows.lock().unwrap().keys().cloned().collect()
    }

    fn record(&self, call: KbCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl KnowledgeBase for RecordingKb {
    async fn ensure_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<CollectionHandle> {
        self.record(KbCall::Ensure(name.to_string()));
        Ok(CollectionHandle::new(name, *schema))
    }

    async fn insert(&self, _handle: &CollectionHandle, rows: Vec<KbRow>) -> Result<()> {
        let keys: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let previous_inserts = self
            .calls()
            .iter()
            .filter(|c| matches!(c, KbCall::Insert(_)))
            .count();
        self.record(KbCall::Insert(keys.clone()));

        if self.insert_successes.is_some_and(|n| previous_inserts >= n) {
            return Err(Error::Qdrant("insert refused".to_string()));
        }

        let mut stored = self.rows.lock().unwrap();
        for row in rows {
            stored.insert(row.id.clone(), row);
        }
        self.inserted.lock().unwrap().extend(keys);
        Ok(())
    }

    async fn delete_by_key(&self, _handle: &CollectionHandle, key: &str) -> Result<()> {
        self.record(KbCall::Delete(key.to_string()));
        if self.failing_deletes.contains(key) {
            return Err(Error::Qdrant(format!("delete of {} refused", key)));
        }
        self.rows.lock().unwrap().remove(key);
        Ok(())
    }

    async fn search(
        &self,
        _handle: &CollectionHandle,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.record(KbCall::Search(query.to_string()));
        let needle = query.to_lowercase();
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.content.to_lowercase().contains(&needle))
            .take(limit)
            .map(|row| SearchHit {
                id: row.id.clone(),
                score: 1.0,
                content: row.content.clone(),
                metadata: row.metadata.clone(),
            })
            .collect())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        self.record(KbCall::Drop(name.to_string()));
        if self.fail_drop {
            return Err(Error::Qdrant("connection refused".to_string()));
        }
        self.rows.lock().unwrap().clear();
        Ok(true)
    }
}

/// Embedder returning constant vectors
pub struct FixedEmbedder {
    dimension: usize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}
