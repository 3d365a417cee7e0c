//! Ingest command implementation

use super::CommandContext;
use crate::error::{Error, Result};
use crate::kb::DOCS_SCHEMA;
use crate::manifest::{
    knowledge_base_name, validate_repository_name, RunCounts, RunOperation, RunStatus, SyncRun,
};
use crate::sync::{insert_in_batches, PathFailure};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Statistics from a first-time ingestion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub repository: String,
    pub branch: String,
    pub knowledge_base_name: String,
    pub files_discovered: usize,
    pub files_ingested: usize,
    pub failures: Vec<PathFailure>,
}

/// Ingest a repository that is not tracked yet.
///
/// The record is created only once at least one file reached the knowledge
/// base, and its manifest lists exactly the files that did.
pub async fn cmd_ingest(
    ctx: &CommandContext<'_>,
    name: &str,
    branch: Option<&str>,
) -> Result<IngestStats> {
    validate_repository_name(name)?;
    let branch = ctx.branch_or_default(branch);

    if ctx.store.get(name).await?.is_some() {
        return Err(Error::DuplicateRepository(name.to_string()));
    }

    info!("Starting ingestion of {}@{}", name, branch);
    let started_at = Utc::now();

    let files = ctx.lister.list_files(name, branch, &ctx.filter()).await?;
    if files.is_empty() {
        return Err(Error::NoFilesDiscovered {
            repository: name.to_string(),
            branch: branch.to_string(),
        });
    }
    info!("Discovered {} files in {}@{}", files.len(), name, branch);

    // No record owns this collection, so anything already in it is stale
    let kb_name = knowledge_base_name(name, branch);
    if ctx.kb.drop_collection(&kb_name).await? {
        warn!("Dropped leftover collection {} before ingesting", kb_name);
    }
    let handle = ctx.kb.ensure_collection(&kb_name, &DOCS_SCHEMA).await?;

    let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
    let fetched = ctx
        .fetcher
        .fetch_files(name, branch, &paths, ctx.config.github.max_concurrent)
        .await;
    let mut failures: Vec<PathFailure> = fetched.failed.into_iter().map(PathFailure::from).collect();

    let inserted = insert_in_batches(
        ctx.kb,
        &handle,
        name,
        branch,
        fetched.loaded,
        ctx.config.sync.insert_batch_size,
    )
    .await;
    failures.extend(inserted.failed);

    if inserted.inserted.is_empty() {
        if let Err(e) = ctx.kb.drop_collection(&kb_name).await {
            warn!("Failed to drop empty collection {}: {}", kb_name, e);
        }
        return Err(match inserted.error {
            Some(message) => Error::GatewayInsertFailure(message),
            None => Error::NothingApplied {
                expected: files.len(),
                failed: failures.len(),
            },
        });
    }

    let record = ctx
        .store
        .create(name, branch, &kb_name, &inserted.inserted)
        .await?;

    let run = SyncRun::started_at(record.id.clone(), RunOperation::Ingest, started_at);
    let status = match (&inserted.error, failures.is_empty()) {
        (Some(_), _) => RunStatus::Failed,
        (None, true) => RunStatus::Completed,
        (None, false) => RunStatus::Partial,
    };
    let counts = RunCounts {
        new: inserted.inserted.len(),
        failed: failures.len(),
        ..RunCounts::default()
    };
    let errors: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    ctx.store.start_run(&run).await?;
    ctx.store
        .complete_run(&run.id, status, counts, &errors)
        .await?;

    if let Some(message) = inserted.error {
        return Err(Error::GatewayInsertFailure(message));
    }

    for failure in &failures {
        warn!(path = %failure.path, "Not ingested: {}", failure.message);
    }
    info!(
        "Ingested {} of {} files into {}",
        record.files.len(),
        files.len(),
        kb_name
    );

    Ok(IngestStats {
        repository: record.name,
        branch: record.branch,
        knowledge_base_name: record.knowledge_base_name,
        files_discovered: files.len(),
        files_ingested: record.files.len(),
        failures,
    })
}

/// Print ingestion statistics
pub fn print_ingest_stats(stats: &IngestStats) {
    println!("\n📥 Ingested {} ({})\n", stats.repository, stats.branch);
    println!("Knowledge base: {}", stats.knowledge_base_name);
    println!("  Discovered: {}", stats.files_discovered);
    println!("  Ingested:   {}", stats.files_ingested);
    println!("  Failed:     {}", stats.failures.len());

    if !stats.failures.is_empty() {
        println!("\nFailures:");
        for failure in &stats.failures {
            println!("  • {}", failure);
        }
        println!("\nRun 'docs-kb sync {}' to retry them.", stats.repository);
    }
}
