//! Errors surfaced to MCP callers as JSON-RPC error responses.

use crate::protocol::JsonRpcError;
use everything_core::{SessionId, SubscriptionError};

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum McpError {
    /// The request needs a session but the transport has none (or it ended)
    #[error("{0}")]
    InvalidSession(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error("Unknown reference type: {0}")]
    UnsupportedReferenceType(String),

    #[error("Unknown argument name: {0}")]
    UnsupportedArgumentName(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(SessionId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidSession(_) => JsonRpcError::INVALID_REQUEST,
            Self::InvalidParams(_)
            | Self::UnsupportedReferenceType(_)
            | Self::UnsupportedArgumentName(_) => JsonRpcError::INVALID_PARAMS,
            Self::MethodNotFound(_) => JsonRpcError::METHOD_NOT_FOUND,
            Self::SessionExists(_) | Self::Internal(_) => JsonRpcError::INTERNAL_ERROR,
        }
    }

    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError::custom(self.code(), self.to_string())
    }
}

impl From<SubscriptionError> for McpError {
    fn from(err: SubscriptionError) -> Self {
        Self::InvalidSession(err.to_string())
    }
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        err.to_rpc_error()
    }
}
