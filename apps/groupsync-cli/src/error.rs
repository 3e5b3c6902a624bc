//! CLI error type and exit codes.

use groupsync_directory::InvalidGroupPath;
use groupsync_directory_rest::RestDirectoryConfigError;
use groupsync_engine::{NotificationError, SyncError};

/// Result alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Error surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad invocation or incomplete settings.
    #[error("{message}")]
    Usage { message: String },

    #[error("directory configuration: {0}")]
    DirectoryConfig(#[from] RestDirectoryConfigError),

    #[error("invalid group path: {0}")]
    GroupPath(#[from] InvalidGroupPath),

    #[error("notifier setup: {0}")]
    Notifier(#[from] NotificationError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Process exit code: 2 for invocation/configuration problems,
    /// 1 for a failed run.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage { .. }
            | CliError::DirectoryConfig(_)
            | CliError::GroupPath(_)
            | CliError::Notifier(_) => 2,
            CliError::Sync(_) => 1,
        }
    }

    pub fn print(&self) {
        eprintln!("error: {self}");
    }
}
