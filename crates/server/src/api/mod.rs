use crate::config::{AppState, ServerConfig};
use crate::middleware::origin;
use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

pub mod mcp;

/// Start the API server and run until Ctrl-C
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::new(&config));

    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(
        addr = %addr,
        path = %state.transport.path,
        stateless = state.transport.stateless,
        "MCP server listening"
    );

    let sweeper = state
        .transport
        .idle_timeout()
        .map(|idle| spawn_idle_sweeper(state.clone(), idle));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await
        .context("Server error")?;

    if let Some(sweeper) = sweeper {
        state.shutdown.cancel();
        let _ = sweeper.await;
    }

    // Connections are drained; stop whatever sessions clients left open
    state.sessions.close_all().await;
    tracing::info!("Server stopped");

    Ok(())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let path = state.transport.path.clone();

    Router::new()
        .route("/api/health", get(health_check))
        .route(
            &path,
            get(mcp::handle_get)
                .post(mcp::handle_post)
                .delete(mcp::handle_delete),
        )
        // Middleware
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            origin::require_local_origin,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.started_at;
    Json(serde_json::json!({
        "status": "ok",
        "service": "everything-server",
        "version": env!("CARGO_PKG_VERSION"),
        "stateless": state.transport.stateless,
        "sessions": state.sessions.len(),
        "uptime_secs": uptime.num_seconds(),
    }))
}

/// Periodically close sessions that have been idle for `idle`.
///
/// Runs until the server's shutdown token is cancelled.
pub fn spawn_idle_sweeper(state: Arc<AppState>, idle: Duration) -> JoinHandle<()> {
    let period = idle.clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let closed = state.sessions.close_idle(idle).await;
                    if closed > 0 {
                        tracing::debug!(closed, remaining = state.sessions.len(), "Idle sweep");
                    }
                }
            }
        }
    })
}

/// Resolves on Ctrl-C. Cancelling `shutdown` first ends every SSE stream so
/// the graceful shutdown is not held open by them.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        // Without a signal handler, run until the token is cancelled elsewhere
        shutdown.cancelled().await;
        return;
    }

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let state = Arc::new(AppState::new(&ServerConfig::default()));
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweeper_closes_abandoned_sessions() {
        use crate::sessions::HttpSession;
        use everything_core::SessionId;

        let state = Arc::new(AppState::new(&ServerConfig::default()));
        let abandoned =
            HttpSession::open(&state.host, SessionId::new("abandoned"), 4, &state.shutdown).unwrap();
        let active =
            HttpSession::open(&state.host, SessionId::new("active"), 4, &state.shutdown).unwrap();
        state.sessions.insert(abandoned.clone());
        state.sessions.insert(active.clone());

        let sweeper = spawn_idle_sweeper(state.clone(), Duration::from_secs(120));

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            active.touch();
        }

        assert!(state.sessions.get(&SessionId::new("abandoned")).is_none());
        assert!(abandoned.closed().is_cancelled());
        assert!(state.sessions.get(&SessionId::new("active")).is_some());
        assert!(!active.closed().is_cancelled());

        state.shutdown.cancel();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_mcp_path() {
        let mut config = ServerConfig::default();
        config.transport.path = "/custom".to_string();
        let app = create_router(Arc::new(AppState::new(&config)));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/custom")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        // Routed, but ping needs a session in stateful mode
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(Request::builder().method("POST").uri("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
