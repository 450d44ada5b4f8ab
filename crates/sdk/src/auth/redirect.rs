//! One-shot loopback listener for the authorization redirect.
//!
//! [`RedirectCapture::bind`] starts listening on `127.0.0.1`,
//! [`RedirectCapture::wait`] resolves on the first request to the callback
//! path, on cancellation or on timeout. The listener is shut down on every
//! one of those paths, and also when the capture is dropped.

use crate::error::{ClientError, ClientResult};
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Page returned to the browser for every callback, whatever its outcome.
pub const COMPLETION_PAGE: &str =
    "<html><body><h1>Authentication complete</h1><p>You can close this window now.</p></body></html>";

/// Upper bound on waiting for the listener to finish its last response.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How a capture ended.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The redirect carried an authorization code.
    Captured { code: String, state: Option<String> },
    /// The redirect carried an error, or neither code nor error.
    Errored(ClientError),
    /// Cancelled or timed out before any redirect arrived.
    Cancelled,
}

impl CaptureOutcome {
    /// The code and returned `state`, or the error the outcome stands for.
    pub fn into_result(self) -> ClientResult<(String, Option<String>)> {
        match self {
            Self::Captured { code, state } => Ok((code, state)),
            Self::Errored(e) => Err(e),
            Self::Cancelled => Err(ClientError::Cancelled),
        }
    }
}

#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            slot.get_or_insert_with(|| value.into_owned());
        }
        params
    }

    fn into_outcome(self) -> CaptureOutcome {
        if let Some(error) = self.error {
            return CaptureOutcome::Errored(ClientError::AuthorizationDenied {
                error,
                description: self.error_description,
            });
        }
        match self.code {
            Some(code) if !code.is_empty() => CaptureOutcome::Captured {
                code,
                state: self.state,
            },
            _ => CaptureOutcome::Errored(ClientError::MalformedRedirect(
                "redirect carried neither a code nor an error".to_string(),
            )),
        }
    }
}

#[derive(Clone)]
struct CallbackState {
    sender: Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>,
}

async fn callback(State(state): State<CallbackState>, RawQuery(query): RawQuery) -> Html<&'static str> {
    let params = CallbackParams::parse(query.as_deref());
    // Only the first redirect counts
    match state.sender.lock().take() {
        Some(sender) => {
            let _ = sender.send(params);
        }
        None => debug!("Ignoring repeated redirect"),
    }
    Html(COMPLETION_PAGE)
}

/// A bound redirect listener.
pub struct RedirectCapture {
    addr: SocketAddr,
    callback_path: String,
    receiver: Option<oneshot::Receiver<CallbackParams>>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl RedirectCapture {
    /// Listen on `127.0.0.1:port`, or on a free port when `port` is `None`.
    pub async fn bind(port: Option<u16>, callback_path: &str) -> ClientResult<Self> {
        if !callback_path.starts_with('/') {
            return Err(ClientError::Config(format!(
                "callback path must start with '/': {}",
                callback_path
            )));
        }
        let port = match port {
            Some(port) => port,
            None => probe_free_port()?,
        };
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ClientError::ListenerBind { addr, source })?;

        let (sender, receiver) = oneshot::channel();
        let state = CallbackState {
            sender: Arc::new(Mutex::new(Some(sender))),
        };
        let app = Router::new()
            .route(callback_path, get(callback))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
            {
                warn!(error = %e, "Redirect listener failed");
            }
        });

        info!(addr = %addr, path = %callback_path, "Listening for authorization redirect");

        Ok(Self {
            addr,
            callback_path: callback_path.to_string(),
            receiver: Some(receiver),
            shutdown,
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The `redirect_uri` to register with the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}{}", self.addr, self.callback_path)
    }

    /// Wait for the redirect, then shut the listener down.
    pub async fn wait(mut self, cancel: CancellationToken, timeout: Duration) -> CaptureOutcome {
        let outcome = match self.receiver.take() {
            Some(receiver) => {
                tokio::select! {
                    received = receiver => match received {
                        Ok(params) => params.into_outcome(),
                        Err(_) => CaptureOutcome::Cancelled,
                    },
                    _ = cancel.cancelled() => CaptureOutcome::Cancelled,
                    _ = tokio::time::sleep(timeout) => {
                        debug!(timeout = ?timeout, "Authorization redirect timed out");
                        CaptureOutcome::Cancelled
                    }
                }
            }
            None => CaptureOutcome::Cancelled,
        };

        self.close().await;
        outcome
    }

    /// Stop the listener, letting an in-flight response finish.
    async fn close(&mut self) {
        self.shutdown.cancel();
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                server.abort();
            }
        }
        debug!(addr = %self.addr, "Redirect listener closed");
    }
}

impl Drop for RedirectCapture {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Ask the OS for a free loopback port. The probe socket is released before
/// returning, so the real bind must follow straight after.
fn probe_free_port() -> ClientResult<u16> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let probe = std::net::TcpListener::bind(addr)
        .map_err(|source| ClientError::ListenerBind { addr, source })?;
    Ok(probe.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind() -> RedirectCapture {
        RedirectCapture::bind(None, "/callback").await.unwrap()
    }

    fn redirect(capture: &RedirectCapture, query: &str) -> JoinHandle<reqwest::Response> {
        let url = format!("{}?{}", capture.redirect_uri(), query);
        tokio::spawn(async move { reqwest::get(url).await.unwrap() })
    }

    #[tokio::test]
    async fn test_captures_code() {
        let capture = bind().await;
        let request = redirect(&capture, "code=abc123&state=xyz");

        let outcome = capture
            .wait(CancellationToken::new(), Duration::from_secs(10))
            .await;
        match outcome {
            CaptureOutcome::Captured { code, state } => {
                assert_eq!(code, "abc123");
                assert_eq!(state.as_deref(), Some("xyz"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let response = request.await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), COMPLETION_PAGE);
    }

    #[tokio::test]
    async fn test_error_redirect_still_gets_page() {
        let capture = bind().await;
        let request = redirect(&capture, "error=access_denied&error_description=User%20said%20no");

        let outcome = capture
            .wait(CancellationToken::new(), Duration::from_secs(10))
            .await;
        match outcome {
            CaptureOutcome::Errored(ClientError::AuthorizationDenied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("User said no"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let response = request.await.unwrap();
        assert_eq!(response.text().await.unwrap(), COMPLETION_PAGE);
    }

    #[tokio::test]
    async fn test_missing_code_is_malformed() {
        let capture = bind().await;
        let _request = redirect(&capture, "state=only");

        let outcome = capture
            .wait(CancellationToken::new(), Duration::from_secs(10))
            .await;
        assert!(matches!(
            outcome,
            CaptureOutcome::Errored(ClientError::MalformedRedirect(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_cancelled_and_unbinds() {
        let capture = bind().await;
        let url = capture.redirect_uri();

        let outcome = capture
            .wait(CancellationToken::new(), Duration::from_millis(50))
            .await;
        assert!(matches!(outcome, CaptureOutcome::Cancelled));
        assert!(matches!(
            outcome.into_result(),
            Err(ClientError::Cancelled)
        ));

        assert!(reqwest::get(url).await.is_err());
    }

    #[tokio::test]
    async fn test_cancellation_token() {
        let capture = bind().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = capture.wait(cancel, Duration::from_secs(60)).await;
        assert!(matches!(outcome, CaptureOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_other_paths_do_not_resolve() {
        let capture = bind().await;
        let stray = format!("http://{}/favicon.ico", capture.local_addr());
        let response = reqwest::get(stray).await.unwrap();
        assert_eq!(response.status(), 404);

        let _request = redirect(&capture, "code=late");
        let outcome = capture
            .wait(CancellationToken::new(), Duration::from_secs(10))
            .await;
        assert!(matches!(outcome, CaptureOutcome::Captured { code, .. } if code == "late"));
    }

    #[tokio::test]
    async fn test_explicit_port_and_bind_failure() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = held.local_addr().unwrap().port();

        match RedirectCapture::bind(Some(port), "/callback").await {
            Err(ClientError::ListenerBind { addr, .. }) => assert_eq!(addr.port(), port),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("bind should fail while the port is held"),
        }

        drop(held);
        let capture = RedirectCapture::bind(Some(port), "/oauth/done").await.unwrap();
        assert_eq!(
            capture.redirect_uri(),
            format!("http://127.0.0.1:{}/oauth/done", port)
        );
    }

    #[test]
    fn test_parse_keeps_first_value() {
        let params = CallbackParams::parse(Some("code=a&code=b&extra=1"));
        assert_eq!(params.code.as_deref(), Some("a"));
        assert!(params.error.is_none());

        let params = CallbackParams::parse(None);
        assert!(matches!(
            params.into_outcome(),
            CaptureOutcome::Errored(ClientError::MalformedRedirect(_))
        ));
    }
}
