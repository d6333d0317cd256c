//! Common error types for FieldSync.

use thiserror::Error;

/// Maximum number of response-body characters kept in an error.
pub const MAX_ERROR_BODY_CHARS: usize = 512;

/// Top-level error type for FieldSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failure or timeout; retried by the transport.
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Server rejected the credentials (401/403).
    #[error("Authentication failed with HTTP {status}: {body}")]
    Auth { status: u16, body: String },

    /// No active session; the network was not contacted.
    #[error("Auth required")]
    AuthRequired,

    /// A single change payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Two distinct local records share a natural key that should be unique.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Local store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Server acknowledged the request but refused it.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write collided with an existing record.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an HTTP error, truncating the body.
    pub fn http(status: u16, body: &str) -> Self {
        Error::Http {
            status,
            body: truncate_body(body),
        }
    }

    /// Build an auth error, truncating the body.
    pub fn auth(status: u16, body: &str) -> Self {
        Error::Auth {
            status,
            body: truncate_body(body),
        }
    }

    /// Whether the transport should spend another attempt on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Http { .. })
    }

    /// Whether this is a 401/403 rejection.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push('…');
    truncated
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_body_is_truncated() {
        let body = "x".repeat(2000);
        match Error::http(500, &body) {
            Error::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), MAX_ERROR_BODY_CHARS + 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::http(503, "busy").is_retryable());
        assert!(!Error::auth(401, "expired").is_retryable());
        assert!(!Error::AuthRequired.is_retryable());
        assert!(!Error::Decode("bad".into()).is_retryable());
        assert!(Error::auth(403, "").is_auth());
    }
}
