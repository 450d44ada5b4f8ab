//! Streamable HTTP transport for the everything SDK.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::sse::{decode_sse_events, EventStream};
use everything_mcp::protocol::{JsonRpcMessage, JsonRpcResponse};
use parking_lot::RwLock;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// What the server did with a posted message
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    /// Notifications and responses: accepted, no body
    Accepted,
    /// Requests: the matching JSON-RPC response
    Response(JsonRpcResponse),
}

/// HTTP transport speaking to one MCP endpoint. Remembers the session id the
/// server hands out on `initialize` and sends it with every later request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<ClientConfig>,
    session_id: Arc<RwLock<Option<String>>>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(config: Arc<ClientConfig>) -> ClientResult<Self> {
        // No client-wide timeout: it would also cut the SSE stream
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            config,
            session_id: Arc::new(RwLock::new(None)),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn with_session(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.session_id.read().as_deref() {
            Some(id) => builder.header(SESSION_ID_HEADER, id),
            None => builder,
        }
    }

    /// POST one JSON-RPC message.
    pub async fn post_message(&self, message: &JsonRpcMessage) -> ClientResult<PostOutcome> {
        let url = self.config.endpoint.clone();
        debug!(url = %url, "POST message");

        let request = self
            .client
            .post(url)
            .timeout(self.config.timeout)
            .header(header::ACCEPT, ACCEPT_BOTH)
            .json(message);
        let response = self.with_session(request).send().await.map_err(map_timeout)?;

        if let Some(id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(id.to_string());
        }

        let response = check_status(response).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(PostOutcome::Accepted);
        }

        let is_sse = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response.text().await?;

        if is_sse {
            // Server may answer a request with a short SSE stream; the
            // response is the last response-shaped event in it
            let response = decode_sse_events(&body)
                .iter()
                .filter_map(|data| match JsonRpcMessage::parse(data) {
                    Ok(JsonRpcMessage::Response(r)) => Some(r),
                    _ => None,
                })
                .last()
                .ok_or_else(|| ClientError::Api {
                    status: 200,
                    message: "SSE reply carried no JSON-RPC response".to_string(),
                })?;
            return Ok(PostOutcome::Response(response));
        }

        if body.trim().is_empty() {
            return Ok(PostOutcome::Accepted);
        }
        Ok(PostOutcome::Response(serde_json::from_str(&body)?))
    }

    /// GET the session's SSE stream.
    pub async fn open_stream(&self) -> ClientResult<EventStream> {
        let url = self.config.endpoint.clone();
        debug!(url = %url, "GET event stream");

        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream");
        let response = self.with_session(request).send().await?;
        let response = check_status(response).await?;

        Ok(EventStream::spawn(response))
    }

    /// DELETE the session. A server that already forgot it is not an error.
    pub async fn delete_session(&self) -> ClientResult<()> {
        let Some(id) = self.session_id.write().take() else {
            return Ok(());
        };
        let url = self.config.endpoint.clone();
        debug!(url = %url, session_id = %id, "DELETE session");

        let response = self
            .client
            .delete(url)
            .timeout(self.config.timeout)
            .header(SESSION_ID_HEADER, id.as_str())
            .send()
            .await
            .map_err(map_timeout)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            _ => check_status(response).await.map(|_| ()),
        }
    }
}

async fn check_status(response: Response) -> ClientResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::from_response(status, &body))
}

fn map_timeout(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use everything_mcp::protocol::JsonRpcRequest;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn create_config(base_url: &str) -> Arc<ClientConfig> {
        let mut config = ClientConfig::new(url::Url::parse(&format!("{}/mcp", base_url)).unwrap());
        config.timeout = Duration::from_secs(5);
        Arc::new(config)
    }

    fn ping() -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", json!({})).unwrap())
    }

    #[tokio::test]
    async fn test_session_id_is_captured_and_sent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(header(SESSION_ID_HEADER, "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": { "second": true }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_ID_HEADER, "abc")
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": {} })),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri())).unwrap();
        assert_eq!(transport.session_id(), None);

        transport.post_message(&ping()).await.unwrap();
        assert_eq!(transport.session_id().as_deref(), Some("abc"));

        match transport.post_message(&ping()).await.unwrap() {
            PostOutcome::Response(r) => assert_eq!(r.result, Some(json!({ "second": true }))),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepted_notification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri())).unwrap();
        let notification = JsonRpcMessage::Notification(
            JsonRpcRequest::notification("notifications/initialized", json!({})).unwrap(),
        );
        assert_eq!(
            transport.post_message(&notification).await.unwrap(),
            PostOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn test_response_inside_sse_body() {
        let server = MockServer::start().await;
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{\"level\":\"info\",\"data\":\"x\"}}\n\n\
                    event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri())).unwrap();
        match transport.post_message(&ping()).await.unwrap() {
            PostOutcome::Response(r) => assert_eq!(r.id, json!(1)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown mcp-session-id"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri())).unwrap();
        match transport.post_message(&ping()).await {
            Err(ClientError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "unknown mcp-session-id");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_sends_session_and_forgets_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_ID_HEADER, "s-1")
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": {} })),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/mcp"))
            .and(header_exists(SESSION_ID_HEADER))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri())).unwrap();
        transport.post_message(&ping()).await.unwrap();
        transport.delete_session().await.unwrap();
        assert_eq!(transport.session_id(), None);

        // Nothing left to delete: no second request
        transport.delete_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_stream_yields_messages() {
        let server = MockServer::start().await;
        let body = ": comment\n\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/resources/updated\",\"params\":{\"uri\":\"test://r/1\"}}\n\n";
        Mock::given(method("GET"))
            .and(path("/mcp"))
            .and(|req: &Request| {
                req.headers
                    .get("accept")
                    .map(|v| v.as_bytes() == b"text/event-stream")
                    .unwrap_or(false)
            })
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri())).unwrap();
        let mut events = transport.open_stream().await.unwrap();

        match events.next_event().await.unwrap().unwrap() {
            JsonRpcMessage::Notification(n) => {
                assert_eq!(n.method, "notifications/resources/updated");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(events.next_event().await.is_none());
    }
}
