//! Delete command - stop tracking a repository

use crate::error::{Error, Result};
use crate::kb::KnowledgeBase;
use crate::manifest::ManifestStore;
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of removing a repository
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub repository: String,
    pub knowledge_base_name: String,
    /// The collection existed and was dropped
    pub collection_dropped: bool,
    pub record_deleted: bool,
    /// Why the collection could not be dropped
    pub gateway_error: Option<String>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.record_deleted && self.gateway_error.is_none()
    }
}

/// Drop the repository's collection, then remove its record.
///
/// The two steps are independent: the record is removed even when the
/// knowledge base cannot be reached, and that failure is reported back.
pub async fn cmd_delete(
    store: &ManifestStore,
    kb: &dyn KnowledgeBase,
    name: &str,
) -> Result<DeleteReport> {
    let record = store
        .get(name)
        .await?
        .ok_or_else(|| Error::RepositoryNotFound(name.to_string()))?;

    info!("Deleting {} and collection {}", record.name, record.knowledge_base_name);

    let (collection_dropped, gateway_error) =
        match kb.drop_collection(&record.knowledge_base_name).await {
            Ok(dropped) => (dropped, None),
            Err(e) => {
                warn!(
                    "Failed to drop collection {}: {}",
                    record.knowledge_base_name, e
                );
                (false, Some(e.to_string()))
            }
        };

    let record_deleted = store.delete(&record.name).await?;

    Ok(DeleteReport {
        repository: record.name,
        knowledge_base_name: record.knowledge_base_name,
        collection_dropped,
        record_deleted,
        gateway_error,
    })
}

/// Print delete outcome
pub fn print_delete_report(report: &DeleteReport) {
    if report.record_deleted {
        println!("✓ Stopped tracking {}", report.repository);
    }
    match (&report.gateway_error, report.collection_dropped) {
        (Some(e), _) => println!(
            "✗ Collection {} could not be dropped: {}",
            report.knowledge_base_name, e
        ),
        (None, true) => println!("✓ Dropped collection {}", report.knowledge_base_name),
        (None, false) => println!(
            "  Collection {} did not exist",
            report.knowledge_base_name
        ),
    }
}
