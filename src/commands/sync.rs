//! Sync command - reconcile tracked repositories with upstream

use super::CommandContext;
use crate::error::{Error, Result};
use crate::manifest::{RepositoryRecord, RunCounts, RunOperation, RunStatus, SyncRun};
use crate::sync::{diff, ApplyPipeline, BucketCounts, ChangeSet, PathFailure};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Sync options
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Compute and report the change set without touching anything
    pub dry_run: bool,
    /// Accept an empty upstream listing and drop every tracked file
    pub allow_empty: bool,
}

/// Outcome of syncing one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub repository: String,
    pub branch: String,
    pub dry_run: bool,
    pub up_to_date: bool,
    pub planned: BucketCounts,
    pub applied: BucketCounts,
    pub failures: Vec<PathFailure>,
    /// The classified paths, reported for dry runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSet>,
}

impl SyncReport {
    fn planned_only(record: &RepositoryRecord, changes: ChangeSet) -> Self {
        Self {
            repository: record.name.clone(),
            branch: record.branch.clone(),
            dry_run: true,
            up_to_date: changes.is_noop(),
            planned: BucketCounts::planned(&changes),
            applied: BucketCounts::default(),
            failures: Vec::new(),
            changes: Some(changes),
        }
    }
}

/// A repository that could not be synced during `sync --all`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub repository: String,
    pub message: String,
}

/// Outcome of syncing every tracked repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncAllReport {
    pub reports: Vec<SyncReport>,
    pub errors: Vec<SyncError>,
}

/// Identifies this process as a lock holder
fn lock_holder() -> String {
    format!("pid-{}-{}", std::process::id(), Uuid::new_v4().simple())
}

/// List upstream and classify paths against the stored manifest
async fn plan(ctx: &CommandContext<'_>, record: &RepositoryRecord, options: SyncOptions) -> Result<ChangeSet> {
    let current = ctx
        .lister
        .list_files(&record.name, &record.branch, &ctx.filter())
        .await?;

    // An empty listing may be a transient upstream failure
    if current.is_empty() && !record.files.is_empty() && !options.allow_empty {
        return Err(Error::NoFilesDiscovered {
            repository: record.name.clone(),
            branch: record.branch.clone(),
        });
    }

    diff(&record.files, &current)
}

/// Sync one tracked repository
pub async fn cmd_sync(
    ctx: &CommandContext<'_>,
    name: &str,
    options: SyncOptions,
) -> Result<SyncReport> {
    let record = ctx
        .store
        .get(name)
        .await?
        .ok_or_else(|| Error::RepositoryNotFound(name.to_string()))?;

    if options.dry_run {
        let changes = plan(ctx, &record, options).await?;
        return Ok(SyncReport::planned_only(&record, changes));
    }

    let holder = lock_holder();
    let ttl = Duration::from_secs(ctx.config.sync.lock_ttl_secs);
    ctx.store.acquire_lock(&record, &holder, ttl).await?;

    let outcome = sync_locked(ctx, &record.id, options).await;

    if let Err(e) = ctx.store.release_lock(&record.id, &holder).await {
        warn!("Failed to release sync lock for {}: {}", record.name, e);
    }
    outcome
}

async fn sync_locked(
    ctx: &CommandContext<'_>,
    repository_id: &str,
    options: SyncOptions,
) -> Result<SyncReport> {
    // Re-read under the lock so a sync that finished meanwhile is seen
    let record = ctx
        .store
        .get_by_id(repository_id)
        .await?
        .ok_or_else(|| Error::RepositoryNotFound(repository_id.to_string()))?;

    info!("Starting sync of {}@{}", record.name, record.branch);
    let changes = plan(ctx, &record, options).await?;

    let pipeline = ApplyPipeline {
        store: ctx.store,
        fetcher: ctx.fetcher,
        kb: ctx.kb,
        options: ctx.apply_options(),
    };

    if changes.is_noop() {
        let result = pipeline.apply(&record, &changes).await?;
        return Ok(SyncReport {
            repository: record.name,
            branch: record.branch,
            dry_run: false,
            up_to_date: result.up_to_date,
            planned: result.planned,
            applied: result.applied,
            failures: result.failures,
            changes: None,
        });
    }

    let run = SyncRun::new(record.id.clone(), RunOperation::Sync);
    ctx.store.start_run(&run).await?;

    match pipeline.apply(&record, &changes).await {
        Ok(result) => {
            let status = if result.is_partial() {
                RunStatus::Partial
            } else {
                RunStatus::Completed
            };
            let errors: Vec<String> = result.failures.iter().map(|f| f.to_string()).collect();
            ctx.store
                .complete_run(&run.id, status, result.run_counts(), &errors)
                .await?;

            Ok(SyncReport {
                repository: record.name,
                branch: record.branch,
                dry_run: false,
                up_to_date: false,
                planned: result.planned,
                applied: result.applied,
                failures: result.failures,
                changes: None,
            })
        }
        Err(e) => {
            let counts = RunCounts {
                failed: changes.to_delete().len() + changes.to_ingest().len(),
                ..RunCounts::default()
            };
            if let Err(record_err) = ctx
                .store
                .complete_run(&run.id, RunStatus::Failed, counts, &[e.to_string()])
                .await
            {
                warn!("Failed to record run outcome for {}: {}", record.name, record_err);
            }
            Err(e)
        }
    }
}

/// Sync every tracked repository, collecting per-repository errors
pub async fn cmd_sync_all(ctx: &CommandContext<'_>, options: SyncOptions) -> Result<SyncAllReport> {
    let records = ctx.store.list().await?;
    info!("Starting sync of {} repositories", records.len());

    let mut report = SyncAllReport::default();
    for record in records {
        match cmd_sync(ctx, &record.name, options).await {
            Ok(r) => report.reports.push(r),
            Err(e) => {
                warn!("Sync of {} failed: {}", record.name, e);
                report.errors.push(SyncError {
                    repository: record.name,
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

fn print_bucket_paths(label: &str, files: &[crate::manifest::FileEntry]) {
    if files.is_empty() {
        return;
    }
    println!("  {}:", label);
    for file in files {
        println!("    {}", file.path);
    }
}

/// Print one repository's sync outcome
pub fn print_sync_report(report: &SyncReport) {
    let title = if report.dry_run { "Sync plan" } else { "Sync" };
    println!("\n🔄 {} for {} ({})\n", title, report.repository, report.branch);

    if report.up_to_date {
        println!("Already up to date ({} files).", report.planned.unchanged);
        return;
    }

    let p = &report.planned;
    println!(
        "Planned:  {} new, {} modified, {} deleted, {} unchanged",
        p.new, p.modified, p.deleted, p.unchanged
    );

    if let Some(changes) = &report.changes {
        print_bucket_paths("New", &changes.new);
        print_bucket_paths("Modified", &changes.modified);
        print_bucket_paths("Deleted", &changes.deleted);
        return;
    }

    let a = &report.applied;
    println!(
        "Applied:  {} new, {} modified, {} deleted, {} failed",
        a.new,
        a.modified,
        a.deleted,
        report.failures.len()
    );

    if !report.failures.is_empty() {
        println!("\nFailures (will be retried on the next sync):");
        for failure in &report.failures {
            println!("  • {}", failure);
        }
    }
}

/// Print the outcome of `sync --all`
pub fn print_sync_all_report(report: &SyncAllReport) {
    if report.reports.is_empty() && report.errors.is_empty() {
        println!("No repositories tracked. Use 'docs-kb ingest' to add one.");
        return;
    }

    for r in &report.reports {
        print_sync_report(r);
    }

    if !report.errors.is_empty() {
        println!("\n✗ {} repositories failed:", report.errors.len());
        for e in &report.errors {
            println!("  • {}: {}", e.repository, e.message);
        }
    }
}
