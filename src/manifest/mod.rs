//! Manifest storage using SQLite
//!
//! This module holds the durable state of every tracked repository:
//! - Repositories (identity, branch, knowledge base name, last-known file manifest)
//! - Sync runs (history and counts)
//! - Sync locks (advisory, one holder per repository)

mod schema;

pub use schema::*;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Derive the knowledge base name for a repository and branch.
///
/// `octo/Repo-X` on `main` becomes `kb_octo_Repo_X_main`.
pub fn knowledge_base_name(name: &str, branch: &str) -> String {
    format!("kb_{}_{}", name.replace('/', "_").replace('-', "_"), branch)
}

/// Check that a repository name has the `owner/repo` form
pub fn validate_repository_name(name: &str) -> Result<()> {
    let valid = match name.split_once('/') {
        Some((owner, repo)) => {
            !owner.is_empty()
                && !repo.is_empty()
                && !repo.contains('/')
                && !name.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRepositoryName(name.to_string()))
    }
}

/// One file in a repository manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Repository-relative path, unique within a manifest
    pub path: String,
    /// Basename of `path`
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Upstream content checksum
    pub sha: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size: u64, sha: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            path,
            name,
            size,
            sha: sha.into(),
        }
    }
}

/// A tracked repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: String,
    pub name: String,
    pub branch: String,
    pub knowledge_base_name: String,
    pub created_at: DateTime<Utc>,
    pub last_ingested: Option<DateTime<Utc>>,
    pub files: Vec<FileEntry>,
}

/// Raw `repositories` row
#[derive(Debug, Clone, FromRow)]
struct RepositoryRow {
    id: String,
    name: String,
    branch: String,
    knowledge_base_name: String,
    created_at: String,
    last_ingested: Option<String>,
    files_json: String,
}

impl TryFrom<RepositoryRow> for RepositoryRecord {
    type Error = Error;

    fn try_from(row: RepositoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            branch: row.branch,
            knowledge_base_name: row.knowledge_base_name,
            created_at: parse_timestamp(&row.created_at)?,
            last_ingested: row.last_ingested.as_deref().map(parse_timestamp).transpose()?,
            files: serde_json::from_str(&row.files_json)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Serialize a manifest, rejecting duplicate paths
fn files_to_json(files: &[FileEntry]) -> Result<String> {
    let mut seen = HashSet::with_capacity(files.len());
    if let Some(dup) = files.iter().find(|f| !seen.insert(f.path.as_str())) {
        return Err(Error::DuplicatePath {
            path: dup.path.clone(),
        });
    }
    Ok(serde_json::to_string(files)?)
}

/// Sync run kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOperation {
    Ingest,
    Sync,
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOperation::Ingest => write!(f, "ingest"),
            RunOperation::Sync => write!(f, "sync"),
        }
    }
}

/// Sync run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Other(format!("Unknown run status: {}", s))),
        }
    }
}

/// Per-bucket counts recorded on a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// A sync run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub repository_id: String,
    pub operation: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub files_new: i64,
    pub files_modified: i64,
    pub files_deleted: i64,
    pub files_unchanged: i64,
    pub files_failed: i64,
    pub errors_json: Option<String>,
}

impl SyncRun {
    pub fn new(repository_id: String, operation: RunOperation) -> Self {
        Self::started_at(repository_id, operation, Utc::now())
    }

    /// A run whose start was observed earlier, e.g. before the repository row existed
    pub fn started_at(
        repository_id: String,
        operation: RunOperation,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            repository_id,
            operation: operation.to_string(),
            started_at: started_at.to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            files_new: 0,
            files_modified: 0,
            files_deleted: 0,
            files_unchanged: 0,
            files_failed: 0,
            errors_json: None,
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Manifest database handle
#[derive(Clone)]
pub struct ManifestStore {
    pool: SqlitePool,
}

impl ManifestStore {
    /// Open the manifest database; call [`ManifestStore::migrate`] before use
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Bring the schema up to [`SCHEMA_VERSION`]
    pub async fn migrate(&self) -> Result<()> {
        let version = self.schema_version().await?;
        if version >= SCHEMA_VERSION {
            debug!("Schema already at version {}", version);
            return Ok(());
        }

        info!("Migrating manifest schema {} -> {}", version, SCHEMA_VERSION);
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Current `PRAGMA user_version`
    pub async fn schema_version(&self) -> Result<i64> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    // ===== Repository Operations =====

    /// Create a repository record; fails if the name is already tracked
    pub async fn create(
        &self,
        name: &str,
        branch: &str,
        knowledge_base_name: &str,
        files: &[FileEntry],
    ) -> Result<RepositoryRecord> {
        validate_repository_name(name)?;
        if self.get(name).await?.is_some() {
            return Err(Error::DuplicateRepository(name.to_string()));
        }

        let now = Utc::now();
        let record = RepositoryRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            branch: branch.to_string(),
            knowledge_base_name: knowledge_base_name.to_string(),
            created_at: now,
            last_ingested: Some(now),
            files: files.to_vec(),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO repositories (id, name, branch, knowledge_base_name, created_at, last_ingested, files_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.branch)
        .bind(&record.knowledge_base_name)
        .bind(record.created_at.to_rfc3339())
        .bind(record.last_ingested.map(|t| t.to_rfc3339()))
        .bind(files_to_json(files)?)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                info!("Created repository record {} ({})", record.name, record.id);
                Ok(record)
            }
            // Lost a race with a concurrent create
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::DuplicateRepository(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List all repositories
    pub async fn list(&self) -> Result<Vec<RepositoryRecord>> {
        let rows = sqlx::query_as::<_, RepositoryRow>(
            "SELECT * FROM repositories ORDER BY created_at ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RepositoryRecord::try_from).collect()
    }

    /// Get repository by name
    pub async fn get(&self, name: &str) -> Result<Option<RepositoryRecord>> {
        let row = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RepositoryRecord::try_from).transpose()
    }

    /// Get repository by ID
    pub async fn get_by_id(&self, id: &str) -> Result<Option<RepositoryRecord>> {
        let row = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RepositoryRecord::try_from).transpose()
    }

    /// Delete a repository with its runs and lock. Returns false if it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let Some(record) = self.get(name).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sync_runs WHERE repository_id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM sync_locks WHERE repository_id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the manifest and set `last_ingested` in one statement
    pub async fn update_manifest(
        &self,
        id: &str,
        files: &[FileEntry],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE repositories SET files_json = ?, last_ingested = ? WHERE id = ?")
                .bind(files_to_json(files)?)
                .bind(at.to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::RepositoryNotFound(id.to_string()));
        }
        debug!("Updated manifest for {} ({} files)", id, files.len());
        Ok(())
    }

    // ===== Lock Operations =====

    /// Take the advisory sync lock, replacing a holder older than `ttl`
    pub async fn acquire_lock(
        &self,
        record: &RepositoryRecord,
        holder: &str,
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let stale_before = now - ttl.as_secs() as i64;

        let stale = sqlx::query("DELETE FROM sync_locks WHERE repository_id = ? AND acquired_at < ?")
            .bind(&record.id)
            .bind(stale_before)
            .execute(&self.pool)
            .await?;
        if stale.rows_affected() > 0 {
            info!("Took over stale sync lock for {}", record.name);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO sync_locks (repository_id, holder, acquired_at)
            VALUES (?, ?, ?)
            ON CONFLICT(repository_id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(holder)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            debug!("Acquired sync lock for {} as {}", record.name, holder);
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT holder FROM sync_locks WHERE repository_id = ?")
                .bind(&record.id)
                .fetch_optional(&self.pool)
                .await?;

        Err(Error::SyncInProgress {
            repository: record.name.clone(),
            holder: current.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Release the lock if `holder` still owns it
    pub async fn release_lock(&self, repository_id: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_locks WHERE repository_id = ? AND holder = ?")
            .bind(repository_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Run Operations =====

    /// Record the start of a run
    pub async fn start_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, repository_id, operation, started_at, status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.repository_id)
        .bind(&run.operation)
        .bind(&run.started_at)
        .bind(&run.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Finish a run with its outcome
    pub async fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        counts: RunCounts,
        errors: &[String],
    ) -> Result<()> {
        let errors_json = if errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(errors)?)
        };

        sqlx::query(
            r#"
            UPDATE sync_runs SET
                completed_at = ?,
                status = ?,
                files_new = ?,
                files_modified = ?,
                files_deleted = ?,
                files_unchanged = ?,
                files_failed = ?,
                errors_json = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(counts.new as i64)
        .bind(counts.modified as i64)
        .bind(counts.deleted as i64)
        .bind(counts.unchanged as i64)
        .bind(counts.failed as i64)
        .bind(errors_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent run for a repository
    pub async fn latest_run(&self, repository_id: &str) -> Result<Option<SyncRun>> {
        let run = sqlx::query_as::<_, SyncRun>(
            "SELECT * FROM sync_runs WHERE repository_id = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }
}
