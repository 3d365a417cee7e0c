//! CLI commands implementation

pub mod delete;
pub mod ingest;
pub mod init;
pub mod list;
pub mod query;
pub mod sync;

pub use delete::*;
pub use ingest::*;
pub use init::*;
pub use list::*;
pub use query::*;
pub use sync::*;

use crate::config::Config;
use crate::kb::KnowledgeBase;
use crate::manifest::ManifestStore;
use crate::remote::{ContentFetcher, FileFilter, RemoteLister};
use crate::sync::ApplyOptions;

/// Collaborators a command runs against, built once at startup
#[derive(Clone, Copy)]
pub struct CommandContext<'a> {
    pub config: &'a Config,
    pub store: &'a ManifestStore,
    pub lister: &'a dyn RemoteLister,
    pub fetcher: &'a dyn ContentFetcher,
    pub kb: &'a dyn KnowledgeBase,
}

impl CommandContext<'_> {
    /// Tracked-file filter from the `[github]` section
    pub fn filter(&self) -> FileFilter {
        FileFilter::from_config(&self.config.github)
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions::from(self.config)
    }

    /// Branch to use when none was given
    pub fn branch_or_default<'b>(&'b self, branch: Option<&'b str>) -> &'b str {
        branch.unwrap_or(&self.config.sync.default_branch)
    }
}

fn format_timestamp(at: Option<&chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Migrated store in a throwaway directory with a config rooted there
    pub async fn store_and_config() -> (ManifestStore, Config, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_base_dir(tmp.path().to_path_buf());
        let store = ManifestStore::connect(&config.paths.db_file).await.unwrap();
        store.migrate().await.unwrap();
        (store, config, tmp)
    }
}
