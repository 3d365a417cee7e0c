//! Repository listing and detail commands

use super::format_timestamp;
use crate::error::{Error, Result};
use crate::manifest::{ManifestStore, RepositoryRecord, SyncRun};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One line of `docs-kb list`
#[derive(Debug, Clone, Serialize)]
pub struct RepositorySummary {
    pub name: String,
    pub branch: String,
    pub knowledge_base_name: String,
    pub file_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_ingested: Option<DateTime<Utc>>,
}

impl From<&RepositoryRecord> for RepositorySummary {
    fn from(record: &RepositoryRecord) -> Self {
        Self {
            name: record.name.clone(),
            branch: record.branch.clone(),
            knowledge_base_name: record.knowledge_base_name.clone(),
            file_count: record.files.len(),
            created_at: record.created_at,
            last_ingested: record.last_ingested,
        }
    }
}

/// Output of `docs-kb show`
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryDetail {
    pub record: RepositoryRecord,
    pub latest_run: Option<SyncRun>,
}

/// List all tracked repositories
pub async fn cmd_list(store: &ManifestStore) -> Result<Vec<RepositorySummary>> {
    let records = store.list().await?;
    Ok(records.iter().map(RepositorySummary::from).collect())
}

/// Show one repository with its most recent run
pub async fn cmd_show(store: &ManifestStore, name: &str) -> Result<RepositoryDetail> {
    let record = store
        .get(name)
        .await?
        .ok_or_else(|| Error::RepositoryNotFound(name.to_string()))?;
    let latest_run = store.latest_run(&record.id).await?;
    Ok(RepositoryDetail { record, latest_run })
}

/// Print repositories list to console
pub fn print_repositories(repositories: &[RepositorySummary]) {
    println!("\n📚 Tracked Repositories\n");

    if repositories.is_empty() {
        println!("No repositories tracked. Use 'docs-kb ingest <owner/repo>' to add one.");
        return;
    }

    for repo in repositories {
        println!("• {} [{}]", repo.name, repo.branch);
        println!("  Knowledge base: {}", repo.knowledge_base_name);
        println!("  Files: {}", repo.file_count);
        println!("  Created: {}", format_timestamp(Some(&repo.created_at)));
        println!("  Last sync: {}", format_timestamp(repo.last_ingested.as_ref()));
        println!();
    }
}

/// Print a repository and its latest run
pub fn print_repository(detail: &RepositoryDetail) {
    let record = &detail.record;
    println!("\n📖 {} [{}]\n", record.name, record.branch);
    println!("ID: {}", record.id);
    println!("Knowledge base: {}", record.knowledge_base_name);
    println!("Created: {}", format_timestamp(Some(&record.created_at)));
    println!("Last sync: {}", format_timestamp(record.last_ingested.as_ref()));
    println!("\nFiles ({}):", record.files.len());
    for file in &record.files {
        println!("  {} ({} bytes, {})", file.path, file.size, file.sha);
    }

    match &detail.latest_run {
        Some(run) => {
            println!("\nLatest run: {} {} at {}", run.operation, run.status, run.started_at);
            println!(
                "  {} new, {} modified, {} deleted, {} unchanged, {} failed",
                run.files_new,
                run.files_modified,
                run.files_deleted,
                run.files_unchanged,
                run.files_failed
            );
            for error in run.errors() {
                println!("  ✗ {}", error);
            }
        }
        None => println!("\nNo runs recorded."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::store_and_config;
    use crate::manifest::{FileEntry, RunCounts, RunOperation, RunStatus};

    #[tokio::test]
    async fn test_list_summarizes_records() {
        let (store, _config, _tmp) = store_and_config().await;
        assert!(cmd_list(&store).await.unwrap().is_empty());

        store
            .create(
                "octo/docs",
                "main",
                "kb_octo_docs_main",
                &[FileEntry::new("README.md", 3, "a")],
            )
            .await
            .unwrap();

        let listed = cmd_list(&store).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "octo/docs");
        assert_eq!(listed[0].file_count, 1);
    }

    #[tokio::test]
    async fn test_show_includes_latest_run() {
        let (store, _config, _tmp) = store_and_config().await;
        let record = store
            .create("octo/docs", "main", "kb_octo_docs_main", &[])
            .await
            .unwrap();
        let run = SyncRun::new(record.id.clone(), RunOperation::Sync);
        store.start_run(&run).await.unwrap();
        store
            .complete_run(
                &run.id,
                RunStatus::Partial,
                RunCounts {
                    new: 2,
                    failed: 1,
                    ..RunCounts::default()
                },
                &["b.md (fetch): HTTP 404".to_string()],
            )
            .await
            .unwrap();

        let detail = cmd_show(&store, "octo/docs").await.unwrap();
        let latest = detail.latest_run.unwrap();
        assert_eq!(latest.status, "partial");
        assert_eq!(latest.files_new, 2);

        assert!(matches!(
            cmd_show(&store, "octo/nope").await,
            Err(Error::RepositoryNotFound(_))
        ));
    }
}
