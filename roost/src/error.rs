//! Error types.

use thiserror::Error;

use crate::models::EntityId;

/// The main error type for roost operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No network connectivity; the remote phase was skipped or failed fast.
    #[error("Offline")]
    Offline,

    /// Transient network failure (timeout, connection reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The remote service rejected the request.
    #[error("Remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    /// Invalid argument passed to an engine method.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A mutation targeted an entity the store has never seen.
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// A repeated mutation was suppressed inside the cooldown window.
    #[error("Mutation debounced")]
    Debounced,

    /// Persistence backend error.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation was cancelled before its result could be applied.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Create a transient network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Create a remote rejection error.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    /// Check if this error is potentially retryable by the next poll or
    /// an explicit refresh.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Offline | Error::Network(_))
    }

    /// Check if this error means the device has no connectivity.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::Offline)
    }
}

/// Result type alias for roost operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::remote("403", "not allowed");
        assert_eq!(format!("{}", e), "Remote error [403]: not allowed");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Offline.is_retryable());
        assert!(Error::network("timed out").is_retryable());
        assert!(!Error::remote("500", "boom").is_retryable());
        assert!(!Error::Debounced.is_retryable());
    }

    #[test]
    fn test_offline() {
        assert!(Error::Offline.is_offline());
        assert!(!Error::network("reset").is_offline());
    }
}
