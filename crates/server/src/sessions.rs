//! Sessions of the Streamable HTTP transport.
//!
//! Every session owns a bounded outbound queue. Notifications and server to
//! client requests are pushed into it by [`HttpPeer`] and drained by the
//! session's SSE stream (`GET` on the MCP path). Answers to server requests
//! come back as JSON-RPC responses `POST`ed by the client.

use async_trait::async_trait;
use everything_core::SessionId;
use everything_mcp::protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use everything_mcp::{McpError, Peer, PeerError, SessionContext, SessionHandle, SessionHost};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Receiving half of a session's outbound queue, held by at most one stream.
/// Dropping it detaches the stream and restarts the session's idle clock.
pub struct OutboundStream {
    receiver: OwnedMutexGuard<mpsc::Receiver<JsonRpcMessage>>,
    peer: Arc<HttpPeer>,
    last_active: Arc<Mutex<Instant>>,
}

impl OutboundStream {
    pub async fn recv(&mut self) -> Option<JsonRpcMessage> {
        self.receiver.recv().await
    }
}

impl Drop for OutboundStream {
    fn drop(&mut self) {
        self.peer.stream_attached.store(false, Ordering::Release);
        *self.last_active.lock() = Instant::now();
    }
}

/// [`Peer`] writing into a session's outbound queue
pub struct HttpPeer {
    session_id: SessionId,
    outbound: mpsc::Sender<JsonRpcMessage>,
    pending: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,
    stream_attached: AtomicBool,
}

impl HttpPeer {
    pub fn channel(
        session_id: SessionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<JsonRpcMessage>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let peer = Self {
            session_id,
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stream_attached: AtomicBool::new(false),
        };
        (peer, receiver)
    }

    /// Route a client response to the request waiting for it.
    /// Returns false when nothing was waiting for that id.
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.as_u64() else {
            return false;
        };
        let Some(waiter) = self.pending.lock().remove(&id) else {
            return false;
        };
        waiter.send(response).is_ok()
    }

    /// Fail every outstanding request with [`PeerError::Closed`]
    pub fn fail_pending(&self) {
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            debug!(
                session_id = %self.session_id,
                requests = dropped.len(),
                "Abandoned pending client requests"
            );
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether an SSE stream is currently draining the outbound queue
    pub fn has_stream(&self) -> bool {
        self.stream_attached.load(Ordering::Acquire)
    }
}

/// Removes a pending entry when the waiting request goes away, e.g. on timeout
struct PendingRequest<'a> {
    peer: &'a HttpPeer,
    id: u64,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.peer.pending.lock().remove(&self.id);
    }
}

#[async_trait]
impl Peer for HttpPeer {
    async fn send_notification(&self, method: &str, params: Value) -> Result<(), PeerError> {
        let message = JsonRpcMessage::Notification(JsonRpcRequest::notification(method, params)?);
        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            // Nobody is draining the queue; notifications are periodic, drop this one
            Err(TrySendError::Full(_)) => {
                debug!(session_id = %self.session_id, method, "Outbound queue full, dropping notification");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(PeerError::Closed),
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, PeerError> {
        // Without a stream the request could only sit in the queue until the
        // caller's timeout
        if !self.has_stream() {
            debug!(session_id = %self.session_id, method, "No SSE stream, not sending request");
            return Err(PeerError::Unavailable);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _pending = PendingRequest { peer: self, id };

        let request = JsonRpcRequest::new(id, method, params)?;
        self.outbound
            .send(JsonRpcMessage::Request(request))
            .await
            .map_err(|_| PeerError::Closed)?;

        let response = rx.await.map_err(|_| PeerError::Closed)?;
        response.into_result().map_err(PeerError::Rejected)
    }
}

/// One client session of the HTTP transport
pub struct HttpSession {
    context: Arc<SessionContext>,
    peer: Arc<HttpPeer>,
    outbound: Arc<tokio::sync::Mutex<mpsc::Receiver<JsonRpcMessage>>>,
    handle: Mutex<Option<SessionHandle>>,
    closed: CancellationToken,
    last_active: Arc<Mutex<Instant>>,
}

impl HttpSession {
    /// Create the session and start its notification loops.
    ///
    /// `shutdown` is the server-wide token; cancelling it ends the session's
    /// SSE stream.
    pub fn open(
        host: &SessionHost,
        id: SessionId,
        capacity: usize,
        shutdown: &CancellationToken,
    ) -> Result<Arc<Self>, McpError> {
        let (peer, receiver) = HttpPeer::channel(id.clone(), capacity);
        let peer = Arc::new(peer);
        let context = SessionContext::new(id, peer.clone());
        let handle = host.open(context.clone())?;

        Ok(Arc::new(Self {
            context,
            peer,
            outbound: Arc::new(tokio::sync::Mutex::new(receiver)),
            handle: Mutex::new(Some(handle)),
            closed: shutdown.child_token(),
            last_active: Arc::new(Mutex::new(Instant::now())),
        }))
    }

    pub fn id(&self) -> &SessionId {
        self.context.id()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn peer(&self) -> &Arc<HttpPeer> {
        &self.peer
    }

    /// Cancelled once the session is closed or the server shuts down
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Claim the outbound queue for an SSE stream. `None` while another
    /// stream holds it; the claim is released when the guard drops.
    pub fn claim_stream(&self) -> Option<OutboundStream> {
        let receiver = self.outbound.clone().try_lock_owned().ok()?;
        self.peer.stream_attached.store(true, Ordering::Release);
        self.touch();

        Some(OutboundStream {
            receiver,
            peer: self.peer.clone(),
            last_active: self.last_active.clone(),
        })
    }

    /// Record client activity
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// No stream attached and no client request for at least `timeout`
    pub fn is_idle(&self, timeout: Duration) -> bool {
        !self.peer.has_stream() && self.last_active.lock().elapsed() >= timeout
    }

    /// Stop the session: end its stream, fail outstanding requests, stop the
    /// notification loops and drop its subscriptions. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        self.peer.fail_pending();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.close().await;
        }
    }
}

/// Open sessions by id
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<HttpSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<HttpSession>) {
        self.sessions.write().insert(session.id().clone(), session);
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<HttpSession>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<HttpSession>> {
        self.sessions.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget every session idle for at least `timeout`.
    /// Returns how many were closed.
    pub async fn close_idle(&self, timeout: Duration) -> usize {
        let expired: Vec<Arc<HttpSession>> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, session)| session.is_idle(timeout))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            info!(session_id = %session.id(), idle_timeout = ?timeout, "Closing idle session");
        }
        futures::future::join_all(expired.iter().map(|session| session.close())).await;
        expired.len()
    }

    /// Close every session, waiting for all of them
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "Closing open sessions");
        futures::future::join_all(sessions.iter().map(|session| session.close())).await;
    }
}
