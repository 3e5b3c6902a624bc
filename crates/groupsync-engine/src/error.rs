//! Engine error taxonomy.
//!
//! Configuration and source-query errors are per-target-group: in
//! automatic mode they abort only the affected group while the run
//! continues. Everything else is fatal for the run.

use thiserror::Error;

use groupsync_directory::{DirectoryError, GroupPath};

use crate::config::ConfigError;
use crate::resolver::SourceQueryError;

/// Error from a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The target group's sync configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The source-group query failed or produced invalid results.
    #[error(transparent)]
    SourceQuery(#[from] SourceQueryError),

    /// The identity directory failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Manual sync was requested for a group under automatic management.
    #[error("group {path} has automatic sync enabled; refusing manual sync")]
    ManagedAutomatically {
        /// Path of the refused target group.
        path: GroupPath,
    },

    /// The persisted deferred-removal state could not be read or written.
    #[error("deferred-removal state error for {path}: {message}")]
    State {
        /// Target group the state belongs to.
        path: GroupPath,
        message: String,
    },
}

impl SyncError {
    /// Create a deferred-removal state error.
    pub fn state(path: GroupPath, message: impl Into<String>) -> Self {
        SyncError::State {
            path,
            message: message.into(),
        }
    }

    /// Whether this error is scoped to a single target group's
    /// configuration, so that an automatic run may continue with the
    /// remaining groups.
    #[must_use]
    pub fn is_per_group(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::SourceQuery(_))
    }
}

/// Result type for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;
