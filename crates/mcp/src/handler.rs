//! Request dispatch for the everything server.
//!
//! [`RequestHandler`] answers every client request the server supports. The
//! transport decides whether a request carries a session and passes that in
//! through [`RequestContext`]; subscription requests need one, everything else
//! works without.

use crate::completion::CompletionResolver;
use crate::config::SamplingConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    empty_result, methods, CompleteParams, CompleteResult, CreateMessageParams, Implementation,
    InitializeParams, InitializeResult, JsonRpcRequest, LoggingLevel, LoggingMessageParams,
    ResourcesCapability, Role, SamplingContent, SamplingMessage, ServerCapabilities,
    SetLevelParams, SubscribeParams, UnsubscribeParams, PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::session::SessionContext;
use everything_core::SubscriptionRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SERVER_NAME: &str = "everything-server";
pub const SERVER_TITLE: &str = "MCP Everything Server";

/// Logger name on the `logging/setLevel` confirmation message
pub const CONFIRMATION_LOGGER: &str = "test-server";

const SAMPLING_SYSTEM_PROMPT: &str = "You are a helpful test server";

/// What the transport knows about the caller
#[derive(Clone, Default)]
pub struct RequestContext {
    session: Option<Arc<SessionContext>>,
}

impl RequestContext {
    pub fn with_session(session: Arc<SessionContext>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Context for transports that do not track sessions
    pub fn stateless() -> Self {
        Self { session: None }
    }

    pub fn session(&self) -> Option<&Arc<SessionContext>> {
        self.session.as_ref()
    }

    fn require_session(&self, message: &str) -> McpResult<&Arc<SessionContext>> {
        self.session
            .as_ref()
            .ok_or_else(|| McpError::InvalidSession(message.to_string()))
    }
}

pub struct RequestHandler {
    registry: Arc<SubscriptionRegistry>,
    completions: CompletionResolver,
    sampling: SamplingConfig,
    server_info: Implementation,
}

impl RequestHandler {
    pub fn new(registry: Arc<SubscriptionRegistry>, sampling: SamplingConfig) -> Self {
        Self {
            registry,
            completions: CompletionResolver::new(),
            sampling,
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some(SERVER_TITLE.to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn with_completions(mut self, completions: CompletionResolver) -> Self {
        self.completions = completions;
        self
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Answer one request. The returned value is the JSON-RPC `result`.
    pub async fn handle_request(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
    ) -> McpResult<Value> {
        let params = request.params.as_ref();
        match request.method.as_str() {
            methods::INITIALIZE => self.initialize(params),
            methods::PING => Ok(empty_result()),
            methods::RESOURCES_SUBSCRIBE => self.subscribe(ctx, params).await,
            methods::RESOURCES_UNSUBSCRIBE => self.unsubscribe(ctx, params),
            methods::LOGGING_SET_LEVEL => self.set_logging_level(ctx, params).await,
            methods::COMPLETION_COMPLETE => self.complete(params),
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    /// Client notifications need no answer; unknown ones are ignored
    pub async fn handle_notification(&self, ctx: &RequestContext, notification: &JsonRpcRequest) {
        let session_id = ctx.session().map(|s| s.id().to_string()).unwrap_or_default();
        match notification.method.as_str() {
            methods::NOTIFICATION_INITIALIZED => {
                debug!(session_id = %session_id, "Client finished initialization");
            }
            methods::NOTIFICATION_CANCELLED => {
                debug!(
                    session_id = %session_id,
                    params = ?notification.params,
                    "Client cancelled a request"
                );
            }
            other => {
                debug!(session_id = %session_id, method = other, "Ignoring notification");
            }
        }
    }

    fn initialize(&self, params: Option<&Value>) -> McpResult<Value> {
        let params: InitializeParams = parse_params(params)?;
        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version
        } else {
            PROTOCOL_VERSION.to_string()
        };

        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol_version = %protocol_version,
            "Client initializing"
        );

        to_result(InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                resources: Some(ResourcesCapability {
                    subscribe: true,
                    list_changed: false,
                }),
                logging: Some(empty_result()),
                completions: Some(empty_result()),
            },
            server_info: self.server_info.clone(),
            instructions: None,
        })
    }

    async fn subscribe(&self, ctx: &RequestContext, params: Option<&Value>) -> McpResult<Value> {
        let session = ctx.require_session("Cannot add subscription for server with null SessionId")?;
        let SubscribeParams { uri } = parse_params(params)?;

        let added = self.registry.subscribe(session.id(), uri.as_str())?;
        debug!(session_id = %session.id(), uri = %uri, added, "Subscribed to resource");

        // Registry lock is released by now; sampling may take a while
        if added && self.sampling.enabled {
            self.sample_new_subscription(session, &uri).await;
        }

        Ok(empty_result())
    }

    fn unsubscribe(&self, ctx: &RequestContext, params: Option<&Value>) -> McpResult<Value> {
        let session =
            ctx.require_session("Cannot remove subscription for server with null SessionId")?;
        let UnsubscribeParams { uri } = parse_params(params)?;

        let removed = self.registry.unsubscribe(session.id(), &uri)?;
        debug!(session_id = %session.id(), uri = %uri, removed, "Unsubscribed from resource");

        Ok(empty_result())
    }

    /// Best effort: failures are logged and never reach the subscriber
    async fn sample_new_subscription(&self, session: &SessionContext, uri: &str) {
        let request = CreateMessageParams {
            messages: vec![SamplingMessage {
                role: Role::User,
                content: SamplingContent::text(format!(
                    "Resource {}, context: A new subscription was started",
                    uri
                )),
            }],
            system_prompt: Some(SAMPLING_SYSTEM_PROMPT.to_string()),
            max_tokens: self.sampling.max_tokens,
            temperature: Some(self.sampling.temperature),
        };

        match tokio::time::timeout(self.sampling.timeout, session.peer().create_message(request))
            .await
        {
            Ok(Ok(result)) => {
                debug!(session_id = %session.id(), uri, model = %result.model, "Sampling completed");
            }
            Ok(Err(e)) => {
                warn!(session_id = %session.id(), uri, error = %e, "Sampling request failed");
            }
            Err(_) => {
                warn!(
                    session_id = %session.id(),
                    uri,
                    timeout_secs = self.sampling.timeout.as_secs(),
                    "Sampling request timed out"
                );
            }
        }
    }

    async fn set_logging_level(
        &self,
        ctx: &RequestContext,
        params: Option<&Value>,
    ) -> McpResult<Value> {
        let params: SetLevelParams = match params {
            Some(_) => parse_params(params)?,
            None => SetLevelParams::default(),
        };
        let raw = params
            .level
            .ok_or_else(|| McpError::InvalidParams("Missing required argument 'level'".to_string()))?;
        let level: LoggingLevel = raw.parse().map_err(McpError::InvalidParams)?;

        let Some(session) = ctx.session() else {
            debug!(level = %level, "Logging level set without a session; nothing to update");
            return Ok(empty_result());
        };

        session.set_logging_level(level);
        info!(session_id = %session.id(), level = %level, "Logging level changed");

        let confirmation = LoggingMessageParams {
            level: LoggingLevel::Debug,
            logger: Some(CONFIRMATION_LOGGER.to_string()),
            data: Value::String(format!("Logging level set to {}", level)),
        };
        if let Err(e) = session.peer().log_message(confirmation).await {
            debug!(session_id = %session.id(), error = %e, "Could not confirm logging level");
        }

        Ok(empty_result())
    }

    fn complete(&self, params: Option<&Value>) -> McpResult<Value> {
        let params: CompleteParams = parse_params(params)?;
        let completion = self
            .completions
            .resolve(&params.reference, &params.argument)?;
        to_result(CompleteResult { completion })
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> McpResult<T> {
    let params = params.ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))?;
    serde_json::from_value(params.clone())
        .map_err(|e| McpError::InvalidParams(format!("Invalid params: {}", e)))
}

fn to_result<T: serde::Serialize>(result: T) -> McpResult<Value> {
    serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
}
