// Session lifecycle: registry entry plus the two notification loops

use crate::config::NotificationConfig;
use crate::error::McpError;
use crate::notify::{self, NotificationLoop};
use crate::peer::Peer;
use crate::protocol::LoggingLevel;
use everything_core::{SessionId, SubscriptionRegistry};
use std::sync::Arc;
use tokio::sync::watch;

/// Connection-scoped state visible to request handlers
pub struct SessionContext {
    id: SessionId,
    peer: Arc<dyn Peer>,
    logging_level: watch::Sender<LoggingLevel>,
}

impl SessionContext {
    pub fn new(id: SessionId, peer: Arc<dyn Peer>) -> Arc<Self> {
        let (logging_level, _) = watch::channel(LoggingLevel::default());
        Arc::new(Self {
            id,
            peer,
            logging_level,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    pub fn logging_level(&self) -> LoggingLevel {
        *self.logging_level.borrow()
    }

    /// Change the threshold used by the session's logging loop
    pub fn set_logging_level(&self, level: LoggingLevel) {
        self.logging_level.send_replace(level);
    }

    fn watch_logging_level(&self) -> watch::Receiver<LoggingLevel> {
        self.logging_level.subscribe()
    }
}

/// Opens sessions against a shared subscription registry
pub struct SessionHost {
    registry: Arc<SubscriptionRegistry>,
    config: NotificationConfig,
}

impl SessionHost {
    pub fn new(registry: Arc<SubscriptionRegistry>, config: NotificationConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Register a session and start its notification loops.
    ///
    /// The registry entry exists before either loop is spawned, so handlers
    /// may use the session as soon as this returns.
    pub fn open(&self, session: Arc<SessionContext>) -> Result<SessionHandle, McpError> {
        let id = session.id().clone();
        if !self.registry.create_session(&id) {
            return Err(McpError::SessionExists(id));
        }
        let entry = RegistryEntry {
            registry: self.registry.clone(),
            session_id: id.clone(),
        };

        let subscription_loop = notify::subscription_updates(
            id.clone(),
            self.registry.clone(),
            session.peer().clone(),
            self.config.subscription_interval,
        );
        let logging_loop = notify::logging_updates(
            id.clone(),
            session.watch_logging_level(),
            session.peer().clone(),
            self.config.logging_interval,
        );

        tracing::info!(session_id = %id, "Session opened");

        Ok(SessionHandle {
            session,
            subscription_loop: Some(subscription_loop),
            logging_loop: Some(logging_loop),
            _entry: entry,
        })
    }
}

/// An open session.
///
/// Only [`SessionHandle::close`] waits for both notification loops to finish
/// before the registry entry is removed. Dropping the handle aborts the loops
/// and removes the entry straight away, so a send already in flight may
/// still reach the peer after the session is gone from the registry.
pub struct SessionHandle {
    session: Arc<SessionContext>,
    // Field order matters: loops are dropped before the registry entry
    subscription_loop: Option<NotificationLoop>,
    logging_loop: Option<NotificationLoop>,
    _entry: RegistryEntry,
}

impl SessionHandle {
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    /// Resource contents changed: re-announce subscriptions without waiting
    /// for the next tick
    pub fn resources_changed(&self) {
        if let Some(notifier) = &self.subscription_loop {
            notifier.wake();
        }
    }

    /// Stop both loops, wait for them, then drop the registry entry
    pub async fn close(mut self) {
        let subscription_loop = self.subscription_loop.take();
        let logging_loop = self.logging_loop.take();

        tokio::join!(
            async {
                if let Some(notifier) = subscription_loop {
                    notifier.stop().await;
                }
            },
            async {
                if let Some(notifier) = logging_loop {
                    notifier.stop().await;
                }
            },
        );

        tracing::info!(session_id = %self.session.id(), "Session closed");
        // `self` drops here, removing the registry entry
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        // `close` takes the loops first
        if self.subscription_loop.is_some() || self.logging_loop.is_some() {
            tracing::warn!(
                session_id = %self.session.id(),
                "Session dropped without close, aborting notification loops"
            );
        }
    }
}

/// Removes a session's registry entry when dropped
struct RegistryEntry {
    registry: Arc<SubscriptionRegistry>,
    session_id: SessionId,
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        if let Some(uris) = self.registry.destroy_session(&self.session_id) {
            tracing::debug!(
                session_id = %self.session_id,
                subscriptions = uris.len(),
                "Removed session subscriptions"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_support::RecordingPeer;
    use std::time::Duration;

    fn host() -> SessionHost {
        SessionHost::new(
            Arc::new(SubscriptionRegistry::new()),
            NotificationConfig {
                subscription_interval: Duration::from_secs(5),
                logging_interval: Duration::from_secs(15),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_registers_before_returning() {
        let host = host();
        let peer = Arc::new(RecordingPeer::new());
        let session = SessionContext::new(SessionId::new("s1"), peer);

        let handle = host.open(session).unwrap();
        assert!(host.registry().contains_session(handle.id()));

        handle.close().await;
        assert!(!host.registry().contains_session(&SessionId::new("s1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_twice_is_rejected() {
        let host = host();
        let peer = Arc::new(RecordingPeer::new());
        let first = host
            .open(SessionContext::new(SessionId::new("dup"), peer.clone()))
            .unwrap();

        let second = host.open(SessionContext::new(SessionId::new("dup"), peer));
        assert!(matches!(second, Err(McpError::SessionExists(_))));

        // The first session is untouched
        assert!(host.registry().contains_session(first.id()));
        first.close().await;
        assert_eq!(host.registry().session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_notifications_and_purges_entry() {
        let host = host();
        let peer = Arc::new(RecordingPeer::new());
        let id = SessionId::new("s1");
        let handle = host
            .open(SessionContext::new(id.clone(), peer.clone()))
            .unwrap();

        host.registry().subscribe(&id, "test://r/1").unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        peer.wait_for_notifications(1).await;

        handle.close().await;
        assert!(!host.registry().contains_session(&id));

        peer.clear();
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(peer.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_still_purges_entry() {
        let host = host();
        let peer = Arc::new(RecordingPeer::new());
        let id = SessionId::new("s1");
        let handle = host
            .open(SessionContext::new(id.clone(), peer.clone()))
            .unwrap();
        host.registry().subscribe(&id, "test://r/1").unwrap();

        drop(handle);
        assert!(!host.registry().contains_session(&id));

        // The aborted loops never tick again
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(peer.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resources_changed_wakes_subscription_loop() {
        let host = host();
        let peer = Arc::new(RecordingPeer::new());
        let id = SessionId::new("s1");
        let handle = host
            .open(SessionContext::new(id.clone(), peer.clone()))
            .unwrap();
        host.registry().subscribe(&id, "test://r/7").unwrap();
        tokio::task::yield_now().await;

        handle.resources_changed();
        peer.wait_for_notifications(1).await;
        assert_eq!(
            peer.notifications_for("notifications/resources/updated"),
            vec![serde_json::json!({ "uri": "test://r/7" })]
        );

        handle.close().await;
    }

    #[test]
    fn test_logging_level_defaults_to_info() {
        let session = SessionContext::new(SessionId::new("s"), Arc::new(RecordingPeer::new()));
        assert_eq!(session.logging_level(), LoggingLevel::Info);
        session.set_logging_level(LoggingLevel::Alert);
        assert_eq!(session.logging_level(), LoggingLevel::Alert);
    }
}
