//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::manifest::ManifestStore;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub config_path: PathBuf,
    /// Overwrite an existing config file
    pub force: bool,
}

/// What `init` wrote
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub schema_version: i64,
}

/// Write the default configuration and migrate the manifest database
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let InitOptions { config_path, force } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let base_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::with_base_dir(base_dir);
    config.paths.config_file = config_path.clone();
    config.save()?;

    let store = ManifestStore::connect(&config.paths.db_file).await?;
    store.migrate().await?;
    let schema_version = store.schema_version().await?;

    info!("Initialized docs-kb at {:?}", config.paths.base_dir);

    Ok(InitReport {
        config_path,
        db_path: config.paths.db_file,
        schema_version,
    })
}

pub fn print_init_report(report: &InitReport) {
    println!("✓ Wrote {}", report.config_path.display());
    println!(
        "✓ Database ready at {} (schema v{})",
        report.db_path.display(),
        report.schema_version
    );
    println!("\nNext: docs-kb ingest <owner/repo>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::SCHEMA_VERSION;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_config_and_migrates() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("kb").join("config.toml");

        let report = cmd_init(InitOptions {
            config_path: config_path.clone(),
            force: false,
        })
        .await
        .unwrap();

        assert!(config_path.exists());
        assert!(report.db_path.exists());
        assert_eq!(report.schema_version, SCHEMA_VERSION);

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.paths.db_file, report.db_path);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "qdrant_url = \"http://qdrant:6334\"\n").unwrap();

        let err = cmd_init(InitOptions {
            config_path: config_path.clone(),
            force: false,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        cmd_init(InitOptions {
            config_path: config_path.clone(),
            force: true,
        })
        .await
        .unwrap();
        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.qdrant_url, Config::default().qdrant_url);
    }
}
