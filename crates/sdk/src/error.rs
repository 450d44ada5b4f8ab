//! Error types for the everything SDK.

use everything_mcp::protocol::JsonRpcError;
use std::net::SocketAddr;

/// Result type for SDK operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Error types that can occur when using the everything SDK.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success HTTP status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Server answered with a JSON-RPC error object.
    #[error("RPC error: {0}")]
    Rpc(JsonRpcError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The redirect listener could not be bound.
    #[error("Failed to bind redirect listener on {addr}: {source}")]
    ListenerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The authorization server redirected back with an `error` parameter.
    #[error("Authorization denied: {error}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    /// The redirect carried neither a code nor an error.
    #[error("Malformed redirect: {0}")]
    MalformedRedirect(String),

    /// The redirect's `state` did not match the one sent.
    #[error("Authorization state mismatch")]
    StateMismatch,

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Connection or wait timed out.
    #[error("Request timed out")]
    Timeout,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Create an API error from a status code and response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        // The MCP endpoint sends JSON-RPC error bodies for protocol failures
        if let Ok(error) = serde_json::from_str::<ErrorBody>(body) {
            return Self::Api {
                status,
                message: error.error.message,
            };
        }

        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            body.to_string()
        };
        Self::Api { status, message }
    }
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: JsonRpcError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_reads_jsonrpc_error() {
        let body = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"Batching not supported"}}"#;
        match ClientError::from_response(400, body) {
            ClientError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Batching not supported");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_response_plain_text() {
        match ClientError::from_response(404, "unknown mcp-session-id") {
            ClientError::Api { message, .. } => assert_eq!(message, "unknown mcp-session-id"),
            other => panic!("unexpected error: {:?}", other),
        }
        match ClientError::from_response(502, "") {
            ClientError::Api { message, .. } => assert_eq!(message, "HTTP 502"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!ClientError::Api { status: 404, message: String::new() }.is_retryable());
        assert!(!ClientError::StateMismatch.is_retryable());
    }
}
