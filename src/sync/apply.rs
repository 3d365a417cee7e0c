//! Apply a change set to the knowledge base and record the outcome

use super::ChangeSet;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kb::{CollectionHandle, KbRow, KnowledgeBase, DOCS_SCHEMA};
use crate::manifest::{FileEntry, ManifestStore, RepositoryRecord, RunCounts};
use crate::progress::Stage;
use crate::remote::{ContentFetcher, FailedFetch, LoadedFile};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Tuning for the apply pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Maximum simultaneous content fetches
    pub max_concurrent: usize,
    /// Files per knowledge base insert call
    pub insert_batch_size: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_concurrent: crate::config::default_max_concurrent(),
            insert_batch_size: crate::config::default_insert_batch_size(),
        }
    }
}

impl From<&Config> for ApplyOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent: config.github.max_concurrent,
            insert_batch_size: config.sync.insert_batch_size,
        }
    }
}

/// Which step a path failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Delete,
    Fetch,
    Insert,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Delete => write!(f, "delete"),
            FailureKind::Fetch => write!(f, "fetch"),
            FailureKind::Insert => write!(f, "insert"),
        }
    }
}

/// A non-fatal per-path failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for PathFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.path, self.kind, self.message)
    }
}

impl From<FailedFetch> for PathFailure {
    fn from(failed: FailedFetch) -> Self {
        Self {
            path: failed.path,
            kind: FailureKind::Fetch,
            message: failed.reason,
        }
    }
}

/// Per-bucket file counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl BucketCounts {
    pub fn planned(changes: &ChangeSet) -> Self {
        Self {
            new: changes.new.len(),
            modified: changes.modified.len(),
            deleted: changes.deleted.len(),
            unchanged: changes.unchanged.len(),
        }
    }
}

/// Outcome of applying a change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Nothing to do; no gateway or manifest calls were made
    pub up_to_date: bool,
    /// What the change set asked for
    pub planned: BucketCounts,
    /// What actually reached the knowledge base
    pub applied: BucketCounts,
    pub failures: Vec<PathFailure>,
    /// Manifest written to the store
    pub manifest: Vec<FileEntry>,
}

impl ApplyResult {
    fn up_to_date(changes: &ChangeSet) -> Self {
        let planned = BucketCounts::planned(changes);
        Self {
            up_to_date: true,
            planned,
            applied: planned,
            failures: Vec::new(),
            manifest: changes.unchanged.clone(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Counts recorded in the run history
    pub fn run_counts(&self) -> RunCounts {
        RunCounts {
            new: self.applied.new,
            modified: self.applied.modified,
            deleted: self.applied.deleted,
            unchanged: self.applied.unchanged,
            failed: self.failures.len(),
        }
    }
}

/// Result of [`insert_in_batches`]
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Entries of every file that reached the knowledge base, in input order
    pub inserted: Vec<FileEntry>,
    /// Files of the failed batch and of every batch after it
    pub failed: Vec<PathFailure>,
    /// Error of the batch that stopped insertion
    pub error: Option<String>,
}

/// Insert fetched files in batches, stopping at the first failed batch
pub async fn insert_in_batches(
    kb: &dyn KnowledgeBase,
    handle: &CollectionHandle,
    repository: &str,
    branch: &str,
    files: Vec<LoadedFile>,
    batch_size: usize,
) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();
    let stage = Stage::start(files.len(), "Indexing files");
    let mut batches = files.chunks(batch_size.max(1));

    for batch in batches.by_ref() {
        let rows: Vec<KbRow> = batch
            .iter()
            .map(|file| KbRow::for_file(repository, branch, file))
            .collect();

        match kb.insert(handle, rows).await {
            Ok(()) => {
                outcome
                    .inserted
                    .extend(batch.iter().map(|file| file.entry.clone()));
                stage.advance(batch.len());
            }
            Err(e) => {
                warn!(collection = %handle.name, error = %e, "Insert batch failed; skipping remaining batches");
                let message = e.to_string();
                outcome.failed.extend(batch.iter().map(|file| PathFailure {
                    path: file.entry.path.clone(),
                    kind: FailureKind::Insert,
                    message: message.clone(),
                }));
                outcome.error = Some(message);
                break;
            }
        }
    }

    for batch in batches {
        outcome.failed.extend(batch.iter().map(|file| PathFailure {
            path: file.entry.path.clone(),
            kind: FailureKind::Insert,
            message: "not attempted after an earlier batch failed".to_string(),
        }));
    }

    stage.finish("Indexed");
    outcome
}

/// Executes a [`ChangeSet`] against the knowledge base and updates the manifest
pub struct ApplyPipeline<'a> {
    pub store: &'a ManifestStore,
    pub fetcher: &'a dyn ContentFetcher,
    pub kb: &'a dyn KnowledgeBase,
    pub options: ApplyOptions,
}

impl ApplyPipeline<'_> {
    /// Delete stale rows, fetch and insert new content, then write the manifest.
    ///
    /// The written manifest lists exactly the paths whose current version is
    /// in the knowledge base, plus stored entries whose delete failed.
    pub async fn apply(&self, repo: &RepositoryRecord, changes: &ChangeSet) -> Result<ApplyResult> {
        if changes.is_noop() {
            info!("{} ({}) is already up to date", repo.name, repo.branch);
            return Ok(ApplyResult::up_to_date(changes));
        }

        let handle = self
            .kb
            .ensure_collection(&repo.knowledge_base_name, &DOCS_SCHEMA)
            .await?;
        let mut failures = Vec::new();

        // 1. Delete modified and deleted paths before inserting anything
        let to_delete = changes.to_delete();
        let mut delete_failed: HashSet<String> = HashSet::new();
        for path in &to_delete {
            if let Err(e) = self.kb.delete_by_key(&handle, path).await {
                let failure = Error::GatewayDeleteFailure {
                    path: path.clone(),
                    reason: e.to_string(),
                };
                warn!(path = %path, "{}", failure);
                failures.push(PathFailure {
                    path: path.clone(),
                    kind: FailureKind::Delete,
                    message: e.to_string(),
                });
                delete_failed.insert(path.clone());
            }
        }
        let deletes_ok = to_delete.len() - delete_failed.len();

        // 2. Fetch new and modified paths; a modified path whose old rows
        //    are still present is not re-inserted
        let to_fetch: Vec<String> = changes
            .to_ingest()
            .into_iter()
            .filter(|p| !delete_failed.contains(p))
            .collect();

        info!(
            "Fetching {} files from {}@{}",
            to_fetch.len(),
            repo.name,
            repo.branch
        );
        let fetched = self
            .fetcher
            .fetch_files(&repo.name, &repo.branch, &to_fetch, self.options.max_concurrent)
            .await;

        failures.extend(fetched.failed.into_iter().map(PathFailure::from));

        // 3. Insert
        let inserted = insert_in_batches(
            self.kb,
            &handle,
            &repo.name,
            &repo.branch,
            fetched.loaded,
            self.options.insert_batch_size,
        )
        .await;
        failures.extend(inserted.failed);

        let expected = to_delete.len() + changes.to_ingest().len();
        let succeeded = deletes_ok + inserted.inserted.len();
        if succeeded == 0 {
            return Err(match inserted.error {
                Some(message) => Error::GatewayInsertFailure(message),
                None => Error::NothingApplied {
                    expected,
                    failed: failures.len(),
                },
            });
        }

        // 4. Record what the knowledge base now holds
        let (manifest, applied) =
            reconcile_manifest(repo, changes, &inserted.inserted, &delete_failed);

        self.store
            .update_manifest(&repo.id, &manifest, Utc::now())
            .await
            .map_err(|e| Error::ManifestUpdateFailure(e.to_string()))?;

        if let Some(message) = inserted.error {
            return Err(Error::GatewayInsertFailure(message));
        }

        info!(
            "Applied changes to {}: {} new, {} modified, {} deleted, {} failed",
            repo.name,
            applied.new,
            applied.modified,
            applied.deleted,
            failures.len()
        );

        Ok(ApplyResult {
            up_to_date: false,
            planned: BucketCounts::planned(changes),
            applied,
            failures,
            manifest,
        })
    }
}

/// Build the post-apply manifest from what actually happened
fn reconcile_manifest(
    repo: &RepositoryRecord,
    changes: &ChangeSet,
    inserted: &[FileEntry],
    delete_failed: &HashSet<String>,
) -> (Vec<FileEntry>, BucketCounts) {
    let inserted: HashMap<&str, &FileEntry> =
        inserted.iter().map(|f| (f.path.as_str(), f)).collect();
    let stored: HashMap<&str, &FileEntry> =
        repo.files.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut manifest = changes.unchanged.clone();
    let mut applied = BucketCounts {
        unchanged: changes.unchanged.len(),
        ..BucketCounts::default()
    };

    for file in &changes.modified {
        if delete_failed.contains(&file.path) {
            // Old rows are still indexed
            if let Some(old) = stored.get(file.path.as_str()) {
                manifest.push((*old).clone());
            }
        } else if let Some(entry) = inserted.get(file.path.as_str()) {
            manifest.push((*entry).clone());
            applied.modified += 1;
        }
    }

    for file in &changes.new {
        if let Some(entry) = inserted.get(file.path.as_str()) {
            manifest.push((*entry).clone());
            applied.new += 1;
        }
    }

    for file in &changes.deleted {
        if delete_failed.contains(&file.path) {
            manifest.push(file.clone());
        } else {
            applied.deleted += 1;
        }
    }

    (manifest, applied)
}
