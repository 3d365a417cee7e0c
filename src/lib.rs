//! docs-kb: keep a searchable knowledge base in sync with GitHub documentation
//!
//! Tracked repositories are listed through the GitHub API, classified against
//! the manifest recorded at the previous sync, and only the files that were
//! added, changed or removed are pushed to the Qdrant-backed knowledge base.

pub mod commands;
pub mod config;
pub mod embed;
pub mod error;
pub mod kb;
pub mod manifest;
pub mod mcp;
pub mod progress;
pub mod remote;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
