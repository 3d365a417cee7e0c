//! SQLite schema definition

/// Schema version recorded in `PRAGMA user_version` after migration
pub const SCHEMA_VERSION: i64 = 1;

/// SQL schema for the manifest database
pub const SCHEMA_SQL: &str = r#"
-- Repositories: one row per tracked repository, manifest stored as JSON
CREATE TABLE IF NOT EXISTS repositories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    branch TEXT NOT NULL DEFAULT 'main',
    knowledge_base_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_ingested TEXT,
    files_json TEXT NOT NULL DEFAULT '[]'
);

-- Sync runs: ingest/sync history
CREATE TABLE IF NOT EXISTS sync_runs (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL REFERENCES repositories(id),
    operation TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    files_new INTEGER NOT NULL DEFAULT 0,
    files_modified INTEGER NOT NULL DEFAULT 0,
    files_deleted INTEGER NOT NULL DEFAULT 0,
    files_unchanged INTEGER NOT NULL DEFAULT 0,
    files_failed INTEGER NOT NULL DEFAULT 0,
    errors_json TEXT
);

-- Sync locks: advisory, at most one holder per repository
CREATE TABLE IF NOT EXISTS sync_locks (
    repository_id TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_repository ON sync_runs(repository_id);
CREATE INDEX IF NOT EXISTS idx_runs_started ON sync_runs(started_at);
"#;
