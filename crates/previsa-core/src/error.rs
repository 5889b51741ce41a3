//! Error types for previsa.

use thiserror::Error;

/// Result type alias using previsa's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for previsa operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Catalog matching failed
    #[error("Matching error: {0}")]
    Matching(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Outbound notification failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether repeating the same call may succeed.
    ///
    /// Missing rows, state conflicts and rejected input fail the same way
    /// every time.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::NotFound(_) | Error::Conflict(_) | Error::InvalidInput(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("job 42".to_string());
        assert_eq!(err.to_string(), "Not found: job 42");
    }

    #[test]
    fn test_error_display_embedding() {
        let err = Error::Embedding("provider unreachable".to_string());
        assert_eq!(err.to_string(), "Embedding error: provider unreachable");
    }

    #[test]
    fn test_error_display_matching() {
        let err = Error::Matching("catalog empty".to_string());
        assert_eq!(err.to_string(), "Matching error: catalog empty");
    }

    #[test]
    fn test_error_display_job() {
        let err = Error::Job("handler already registered".to_string());
        assert_eq!(err.to_string(), "Job error: handler already registered");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("k must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid input: k must be positive");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("already approved".to_string());
        assert_eq!(err.to_string(), "Conflict: already approved");
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(Error::Request("connection reset".to_string()).is_transient());
        assert!(!Error::NotFound("job 1".to_string()).is_transient());
        assert!(!Error::Conflict("job 1 is done".to_string()).is_transient());
        assert!(!Error::InvalidInput("empty".to_string()).is_transient());
    }

    #[test]
    fn test_error_display_notification() {
        let err = Error::Notification("webhook returned 500".to_string());
        assert_eq!(err.to_string(), "Notification error: webhook returned 500");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err(Error::Internal("test".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
