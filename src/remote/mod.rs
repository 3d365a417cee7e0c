//! Upstream repository access
//!
//! This module provides:
//! - Traits for listing a repository's tracked files and fetching their bodies
//! - File filtering by extension and path prefix
//! - A GitHub REST implementation with request pacing and retries

mod github;
mod rate_limit;

pub use github::*;
pub use rate_limit::*;

use crate::error::Result;
use crate::manifest::FileEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which files of a repository are tracked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    /// Allowed extensions with leading dot, matched case-insensitively
    pub extensions: Vec<String>,
    /// Optional path prefix
    pub path_prefix: Option<String>,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            extensions: crate::config::default_extensions(),
            path_prefix: None,
        }
    }
}

impl FileFilter {
    pub fn new(extensions: Vec<String>, path_prefix: Option<String>) -> Self {
        Self {
            extensions,
            path_prefix: path_prefix.filter(|p| !p.is_empty()),
        }
    }

    /// Build from the `[github]` configuration section
    pub fn from_config(config: &crate::config::GitHubConfig) -> Self {
        Self::new(config.extensions.clone(), config.path_prefix.clone())
    }

    /// Whether a repository-relative path is tracked
    pub fn matches(&self, path: &str) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }

        let basename = path.rsplit('/').next().unwrap_or(path);
        let Some(dot) = basename.rfind('.') else {
            return false;
        };
        let suffix = &basename[dot..];
        self.extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(suffix))
    }
}

/// A file body fetched from upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedFile {
    /// Manifest entry, checksum taken from the fetched object
    #[serde(flatten)]
    pub entry: FileEntry,
    pub content: String,
}

/// A path that could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFetch {
    pub path: String,
    pub reason: String,
}

/// Result of a concurrent fetch; both lists follow request order
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub loaded: Vec<LoadedFile>,
    pub failed: Vec<FailedFetch>,
}

/// Lists the current manifest of a repository branch
#[async_trait]
pub trait RemoteLister: Send + Sync {
    async fn list_files(
        &self,
        repository: &str,
        branch: &str,
        filter: &FileFilter,
    ) -> Result<Vec<FileEntry>>;
}

/// Fetches file bodies from a repository branch
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch one file
    async fn fetch_file(&self, repository: &str, branch: &str, path: &str) -> Result<LoadedFile>;

    /// Fetch many files with at most `max_concurrent` requests in flight.
    /// Individual failures are collected, never propagated.
    async fn fetch_files(
        &self,
        repository: &str,
        branch: &str,
        paths: &[String],
        max_concurrent: usize,
    ) -> FetchOutcome;
}
