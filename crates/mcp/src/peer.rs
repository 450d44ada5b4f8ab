// Outbound half of a session's connection

use crate::protocol::{
    methods, CreateMessageParams, CreateMessageResult, JsonRpcError, LoggingMessageParams,
    ResourceUpdatedParams,
};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The connection is gone; callers should stop sending
    #[error("Peer connection closed")]
    Closed,

    #[error("Peer did not answer in time")]
    Timeout,

    /// The connection is up but cannot carry requests right now
    #[error("No stream open to deliver requests to the peer")]
    Unavailable,

    #[error("Peer rejected request: {0}")]
    Rejected(JsonRpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sends messages to the client connected to a session.
///
/// Implemented by each transport. A send either hands a whole message to the
/// transport or fails; it never leaves a partial message behind.
#[async_trait::async_trait]
pub trait Peer: Send + Sync {
    /// Send a one-way notification
    async fn send_notification(&self, method: &str, params: Value) -> Result<(), PeerError>;

    /// Send a request and wait for the client's result
    async fn send_request(&self, method: &str, params: Value) -> Result<Value, PeerError>;

    async fn notify_resource_updated(&self, uri: &str) -> Result<(), PeerError> {
        let params = serde_json::to_value(ResourceUpdatedParams {
            uri: uri.to_string(),
        })?;
        self.send_notification(methods::NOTIFICATION_RESOURCE_UPDATED, params)
            .await
    }

    async fn log_message(&self, message: LoggingMessageParams) -> Result<(), PeerError> {
        let params = serde_json::to_value(message)?;
        self.send_notification(methods::NOTIFICATION_MESSAGE, params)
            .await
    }

    /// Ask the client to sample its model
    async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, PeerError> {
        let params = serde_json::to_value(params)?;
        let result = self
            .send_request(methods::SAMPLING_CREATE_MESSAGE, params)
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Peer for requests that arrive without a session (stateless transports).
/// Every send fails with [`PeerError::Closed`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedPeer;

#[async_trait::async_trait]
impl Peer for DisconnectedPeer {
    async fn send_notification(&self, _method: &str, _params: Value) -> Result<(), PeerError> {
        Err(PeerError::Closed)
    }

    async fn send_request(&self, _method: &str, _params: Value) -> Result<Value, PeerError> {
        Err(PeerError::Closed)
    }
}
