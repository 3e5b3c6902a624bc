//! Directory error types.
//!
//! Error definitions with transient/permanent classification. Retry and
//! backoff, where wanted, belong to the directory client, not to callers.

use thiserror::Error;

/// Error from an identity directory read or write.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A referenced entity does not exist.
    #[error("{kind} not found: {identifier}")]
    NotFound {
        /// Entity kind ("group", "user", ...).
        kind: &'static str,
        /// The identifier that failed to resolve.
        identifier: String,
    },

    /// The directory rejected the credentials.
    #[error("directory authentication failed")]
    Unauthorized,

    /// A request failed in transit or was rejected by the server.
    #[error("directory request failed: {message}")]
    Request {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A request did not complete within the configured deadline.
    #[error("directory request timed out")]
    Timeout,

    /// The directory returned a payload the client could not interpret.
    #[error("invalid directory response: {message}")]
    InvalidResponse { message: String },
}

impl DirectoryError {
    /// Create a not-found error.
    pub fn not_found(kind: &'static str, identifier: impl Into<String>) -> Self {
        DirectoryError::NotFound {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Create a request error without an underlying source.
    pub fn request(message: impl Into<String>) -> Self {
        DirectoryError::Request {
            message: message.into(),
            source: None,
        }
    }

    /// Create a request error wrapping an underlying source.
    pub fn request_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Request {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        DirectoryError::InvalidResponse {
            message: message.into(),
        }
    }

    /// Whether the failure is plausibly transient (worth retrying by an
    /// outer scheduler; the engine itself never retries).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::Request { .. } | DirectoryError::Timeout
        )
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
