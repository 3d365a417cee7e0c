//! Manifest reconciliation

use crate::error::{Error, Result};
use crate::manifest::FileEntry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Classification of every path in the stored and current manifests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// In current only
    pub new: Vec<FileEntry>,
    /// In both, checksum differs (current entry)
    pub modified: Vec<FileEntry>,
    /// In stored only (stored entry)
    pub deleted: Vec<FileEntry>,
    /// In both, same checksum (current entry)
    pub unchanged: Vec<FileEntry>,
}

impl ChangeSet {
    /// True when nothing needs to be applied
    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths to remove from the knowledge base: modified then deleted
    pub fn to_delete(&self) -> Vec<String> {
        self.modified
            .iter()
            .chain(&self.deleted)
            .map(|f| f.path.clone())
            .collect()
    }

    /// Paths to fetch and insert: new then modified
    pub fn to_ingest(&self) -> Vec<String> {
        self.new
            .iter()
            .chain(&self.modified)
            .map(|f| f.path.clone())
            .collect()
    }

    /// Number of paths in the union of both manifests
    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.unchanged.len()
    }
}

fn index_by_path<'a>(files: &'a [FileEntry]) -> Result<HashMap<&'a str, &'a FileEntry>> {
    let mut index = HashMap::with_capacity(files.len());
    for file in files {
        if index.insert(file.path.as_str(), file).is_some() {
            return Err(Error::DuplicatePath {
                path: file.path.clone(),
            });
        }
    }
    Ok(index)
}

/// Classify paths between the stored and current manifests.
///
/// Buckets keep the order of `current` (new, modified, unchanged) and of
/// `stored` (deleted). A path repeated within either input is rejected.
pub fn diff(stored: &[FileEntry], current: &[FileEntry]) -> Result<ChangeSet> {
    let stored_index = index_by_path(stored)?;
    let current_paths: HashSet<&str> = index_by_path(current)?.into_keys().collect();

    let mut changes = ChangeSet::default();

    for file in current {
        match stored_index.get(file.path.as_str()) {
            None => changes.new.push(file.clone()),
            Some(old) if old.sha != file.sha => changes.modified.push(file.clone()),
            Some(_) => changes.unchanged.push(file.clone()),
        }
    }

    changes.deleted = stored
        .iter()
        .filter(|f| !current_paths.contains(f.path.as_str()))
        .cloned()
        .collect();

    Ok(changes)
}
