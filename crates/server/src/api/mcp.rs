//! Streamable HTTP endpoint: `POST` carries client messages, `GET` opens the
//! session's SSE stream and `DELETE` ends the session.

use crate::config::AppState;
use crate::sessions::HttpSession;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use everything_core::SessionId;
use everything_mcp::protocol::{methods, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use everything_mcp::RequestContext;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SESSION_ID_HEADER: &str = "mcp-session-id";

pub async fn handle_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let message = match JsonRpcMessage::parse(&body) {
        Ok(message) => message,
        Err(error) => return rpc_error_response(StatusCode::BAD_REQUEST, error),
    };

    if state.transport.stateless {
        return handle_stateless(&state, message).await;
    }

    if let JsonRpcMessage::Request(request) = &message {
        if request.method == methods::INITIALIZE {
            return initialize_session(&state, request).await;
        }
    }

    let session = match lookup_session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let ctx = RequestContext::with_session(session.context().clone());

    match message {
        JsonRpcMessage::Request(request) => {
            let response = dispatch(&state, &ctx, &request).await;
            jsonrpc_http_response(response, None)
        }
        JsonRpcMessage::Notification(notification) => {
            state.handler.handle_notification(&ctx, &notification).await;
            StatusCode::ACCEPTED.into_response()
        }
        JsonRpcMessage::Response(response) => {
            let id = response.id.clone();
            if !session.peer().complete(response) {
                debug!(session_id = %session.id(), id = %id, "Response matched no pending request");
            }
            StatusCode::ACCEPTED.into_response()
        }
    }
}

pub async fn handle_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if state.transport.stateless {
        return (StatusCode::METHOD_NOT_ALLOWED, "sse not supported in stateless mode")
            .into_response();
    }

    let session = match lookup_session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let Some(mut outbound) = session.claim_stream() else {
        return (StatusCode::CONFLICT, "sse stream already open").into_response();
    };

    let closed = session.closed();
    let session_id = session.id().clone();
    debug!(session_id = %session_id, "SSE stream opened");

    let stream = async_stream::stream! {
        loop {
            let message = tokio::select! {
                _ = closed.cancelled() => break,
                message = outbound.recv() => message,
            };
            let Some(message) = message else { break };

            match Event::default().json_data(&message) {
                Ok(event) => yield Ok::<Event, Infallible>(event),
                Err(e) => warn!(session_id = %session_id, error = %e, "Failed to encode SSE event"),
            }
        }
        debug!(session_id = %session_id, "SSE stream closed");
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub async fn handle_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if state.transport.stateless {
        return (StatusCode::METHOD_NOT_ALLOWED, "no sessions in stateless mode").into_response();
    }

    let Some(id) = header_str(&headers, SESSION_ID_HEADER) else {
        return (StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
    };
    let Some(session) = state.sessions.remove(&SessionId::new(id)) else {
        return (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response();
    };

    session.close().await;
    StatusCode::NO_CONTENT.into_response()
}

async fn initialize_session(state: &AppState, request: &JsonRpcRequest) -> Response {
    let session_id = SessionId::generate();
    let session = match HttpSession::open(
        &state.host,
        session_id.clone(),
        state.transport.channel_capacity,
        &state.shutdown,
    ) {
        Ok(session) => session,
        Err(e) => {
            let id = request.id.clone().unwrap_or(Value::Null);
            return jsonrpc_http_response(JsonRpcResponse::error(id, e.into()), None);
        }
    };

    let ctx = RequestContext::with_session(session.context().clone());
    let response = dispatch(state, &ctx, request).await;
    if response.error.is_some() {
        session.close().await;
        return jsonrpc_http_response(response, None);
    }

    state.sessions.insert(session);
    jsonrpc_http_response(response, Some(session_id.as_str()))
}

async fn handle_stateless(state: &AppState, message: JsonRpcMessage) -> Response {
    let ctx = RequestContext::stateless();
    match message {
        JsonRpcMessage::Request(request) => {
            let response = dispatch(state, &ctx, &request).await;
            jsonrpc_http_response(response, None)
        }
        JsonRpcMessage::Notification(notification) => {
            state.handler.handle_notification(&ctx, &notification).await;
            StatusCode::ACCEPTED.into_response()
        }
        // Nothing is ever requested from clients without a session
        JsonRpcMessage::Response(_) => StatusCode::ACCEPTED.into_response(),
    }
}

async fn dispatch(state: &AppState, ctx: &RequestContext, request: &JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone().unwrap_or(Value::Null);
    match state.handler.handle_request(ctx, request).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => {
            debug!(method = %request.method, error = %e, "Request failed");
            JsonRpcResponse::error(id, e.into())
        }
    }
}

fn lookup_session(state: &AppState, headers: &HeaderMap) -> Result<Arc<HttpSession>, Response> {
    let Some(id) = header_str(headers, SESSION_ID_HEADER) else {
        return Err((StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response());
    };
    let session = state
        .sessions
        .get(&SessionId::new(id))
        .ok_or_else(|| (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response())?;
    session.touch();
    Ok(session)
}

fn jsonrpc_http_response(response: JsonRpcResponse, session_id: Option<&str>) -> Response {
    let mut http = Json(response).into_response();
    if let Some(value) = session_id.and_then(|sid| HeaderValue::from_str(sid).ok()) {
        http.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    http
}

fn rpc_error_response(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::error(Value::Null, error))).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}
