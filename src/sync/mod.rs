//! Incremental reconciliation
//!
//! [`diff`] classifies every path between a stored and a freshly listed
//! manifest; [`ApplyPipeline`] turns that classification into knowledge base
//! deletes and inserts and writes back the manifest that resulted.

mod apply;
mod diff;

pub use apply::*;
pub use diff::*;
