//! Run-scoped hierarchy snapshot.
//!
//! The group hierarchy is fetched once per reconciliation run and passed
//! explicitly to every resolver call. Nothing here may outlive the run;
//! acting on a stale snapshot would reconcile against stale membership.

use serde_json::Value;

use groupsync_directory::{DirectoryReader, GroupNode};

use crate::error::SyncResult;

/// Snapshot of the full group hierarchy for one reconciliation run.
#[derive(Debug)]
pub struct RunContext {
    hierarchy: Vec<GroupNode>,
    document: Value,
}

impl RunContext {
    /// Fetch a fresh snapshot from the directory.
    pub async fn load(directory: &dyn DirectoryReader) -> SyncResult<Self> {
        let hierarchy = directory.group_hierarchy().await?;
        Ok(Self::from_hierarchy(hierarchy))
    }

    /// Build a context from an already-fetched hierarchy.
    #[must_use]
    pub fn from_hierarchy(hierarchy: Vec<GroupNode>) -> Self {
        // GroupNode serializes infallibly: string keys, no non-finite
        // numbers.
        let document =
            serde_json::to_value(&hierarchy).unwrap_or(Value::Array(Vec::new()));
        Self {
            hierarchy,
            document,
        }
    }

    /// The hierarchy as typed nodes.
    #[must_use]
    pub fn hierarchy(&self) -> &[GroupNode] {
        &self.hierarchy
    }

    /// The hierarchy as a JSON document, in the directory wire shape,
    /// for path-query evaluation.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }
}
