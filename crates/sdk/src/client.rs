//! MCP client for the everything server.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{EventStream, HttpTransport, PostOutcome};
use everything_mcp::protocol::{
    empty_result, methods, CompleteParams, CompleteResult, Completion, CompletionArgument,
    Implementation, InitializeParams, InitializeResult, JsonRpcError, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, LoggingLevel, Reference, SetLevelParams, SubscribeParams,
    PROTOCOL_VERSION,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Client for one MCP endpoint.
///
/// Call [`McpClient::initialize`] first; it opens the session every other
/// call runs in. Server-initiated messages (notifications and sampling
/// requests) arrive on [`McpClient::events`].
#[derive(Clone)]
pub struct McpClient {
    config: Arc<ClientConfig>,
    http: HttpTransport,
    next_id: Arc<AtomicU64>,
}

impl McpClient {
    /// Create a new client builder.
    pub fn builder() -> McpClientBuilder {
        McpClientBuilder::new()
    }

    /// Create a client from configuration.
    pub fn from_config(config: ClientConfig) -> ClientResult<Self> {
        let config = Arc::new(config);
        let http = HttpTransport::new(config.clone())?;

        Ok(Self {
            config,
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Session id assigned by the server, once initialized.
    pub fn session_id(&self) -> Option<String> {
        self.http.session_id()
    }

    /// Send a request and decode its result.
    pub async fn request<P, R>(&self, method: &str, params: P) -> ClientResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params)?;

        match self.http.post_message(&JsonRpcMessage::Request(request)).await? {
            PostOutcome::Response(response) => {
                let result = response.into_result().map_err(ClientError::Rpc)?;
                Ok(serde_json::from_value(result)?)
            }
            PostOutcome::Accepted => Err(ClientError::Api {
                status: 202,
                message: format!("{} was accepted without a response", method),
            }),
        }
    }

    /// Send a notification.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> ClientResult<()> {
        let notification = JsonRpcRequest::notification(method, params)?;
        self.http
            .post_message(&JsonRpcMessage::Notification(notification))
            .await?;
        Ok(())
    }

    /// Run the initialize handshake.
    pub async fn initialize(&self) -> ClientResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({ "sampling": {} }),
            client_info: Implementation {
                name: self.config.client_name.clone(),
                title: None,
                version: self.config.client_version.clone(),
            },
        };
        let result: InitializeResult = self.request(methods::INITIALIZE, params).await?;
        self.notify(methods::NOTIFICATION_INITIALIZED, empty_result())
            .await?;

        tracing::info!(
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            session_id = ?self.session_id(),
            "Initialized MCP session"
        );
        Ok(result)
    }

    pub async fn ping(&self) -> ClientResult<()> {
        let _: Value = self.request(methods::PING, empty_result()).await?;
        Ok(())
    }

    /// Subscribe to updates of a resource.
    pub async fn subscribe(&self, uri: impl Into<String>) -> ClientResult<()> {
        let _: Value = self
            .request(methods::RESOURCES_SUBSCRIBE, SubscribeParams { uri: uri.into() })
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, uri: impl Into<String>) -> ClientResult<()> {
        let _: Value = self
            .request(methods::RESOURCES_UNSUBSCRIBE, SubscribeParams { uri: uri.into() })
            .await?;
        Ok(())
    }

    /// Set the minimum level of log messages the server sends.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> ClientResult<()> {
        let params = SetLevelParams {
            level: Some(level.as_str().to_string()),
        };
        let _: Value = self.request(methods::LOGGING_SET_LEVEL, params).await?;
        Ok(())
    }

    /// Ask for completions of a prompt or resource-template argument.
    pub async fn complete(
        &self,
        reference: Reference,
        argument_name: impl Into<String>,
        prefix: impl Into<String>,
    ) -> ClientResult<Completion> {
        let params = CompleteParams {
            reference,
            argument: CompletionArgument {
                name: argument_name.into(),
                value: prefix.into(),
            },
        };
        let result: CompleteResult = self.request(methods::COMPLETION_COMPLETE, params).await?;
        Ok(result.completion)
    }

    /// Answer a request the server sent over the event stream.
    pub async fn respond<R: Serialize>(&self, id: Value, result: R) -> ClientResult<()> {
        let response = JsonRpcResponse::success(id, serde_json::to_value(result)?);
        self.http
            .post_message(&JsonRpcMessage::Response(response))
            .await?;
        Ok(())
    }

    /// Decline a request the server sent over the event stream.
    pub async fn respond_error(&self, id: Value, error: JsonRpcError) -> ClientResult<()> {
        let response = JsonRpcResponse::error(id, error);
        self.http
            .post_message(&JsonRpcMessage::Response(response))
            .await?;
        Ok(())
    }

    /// Open the stream of server-initiated messages.
    pub async fn events(&self) -> ClientResult<EventStream> {
        if self.session_id().is_none() {
            return Err(ClientError::Config(
                "initialize must be called before opening the event stream".to_string(),
            ));
        }
        self.http.open_stream().await
    }

    /// End the session.
    pub async fn close(&self) -> ClientResult<()> {
        self.http.delete_session().await
    }
}

/// Builder for creating an McpClient.
pub struct McpClientBuilder {
    endpoint: Option<String>,
    timeout: Duration,
    client_name: Option<String>,
    client_version: Option<String>,
}

impl McpClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(30),
            client_name: None,
            client_version: None,
        }
    }

    /// Set the MCP endpoint URL.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self.client_version = Some(version.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> ClientResult<McpClient> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| ClientError::Config("endpoint is required".to_string()))?;

        let endpoint = Url::parse(&endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "unsupported endpoint scheme: {}",
                endpoint.scheme()
            )));
        }

        let mut config = ClientConfig::new(endpoint);
        config.timeout = self.timeout;
        if let Some(name) = self.client_name {
            config.client_name = name;
        }
        if let Some(version) = self.client_version {
            config.client_version = version;
        }

        McpClient::from_config(config)
    }
}

impl Default for McpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
