//! Error types for the sync layer
//!
//! Provides unified error handling using thiserror. Payloads are plain strings
//! and integers so a single failure can be cloned out to every caller that
//! joined the same in-flight request.

use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for fetching, caching and syncing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Upstream kept answering 429 until the retry budget ran out
    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Credentials rejected by the upstream (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No credentials have been supplied for this platform
    #[error("Not authenticated with {0}")]
    NotAuthenticated(String),

    /// Any other non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport failure (connection refused, timeout, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body did not match the expected envelope
    #[error("Malformed response: {0}")]
    Parse(String),

    /// Upstream reported an error inside a well-formed envelope
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Persistent store read/write failure
    #[error("Store error: {0}")]
    Store(String),

    /// Collection name not served by this platform
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The caller cancelled the sync
    #[error("Sync cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    // == Retryable ==
    /// Returns true for failures a higher-level retry policy may retry
    /// indefinitely: rate limiting and transport errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RateLimited { .. } | SyncError::Network(_))
    }

    /// Returns true if the caller should prompt for new credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthorized(_) | SyncError::NotAuthenticated(_)
        )
    }
}

// == Conversions ==
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Parse(err.to_string())
        } else if err.is_builder() {
            SyncError::Internal(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the sync layer.
pub type Result<T> = std::result::Result<T, SyncError>;
