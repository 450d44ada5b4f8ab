//! Per-session background notification loops.
//!
//! Each session runs two loops for as long as it is open: one re-announces
//! every subscribed resource, the other emits sample log messages filtered by
//! the session's logging level. A loop stops on [`NotificationLoop::stop`] or
//! on the first failed send, whichever comes first.

use crate::peer::{Peer, PeerError};
use crate::protocol::{LoggingLevel, LoggingMessageParams};
use everything_core::{SessionId, SubscriptionRegistry};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Logger name attached to messages from the logging loop
pub const LOGGER_NAME: &str = "everything-server";

/// A background task emitting notifications for one session
pub struct NotificationLoop {
    name: &'static str,
    session_id: SessionId,
    shutdown: CancellationToken,
    wake: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl NotificationLoop {
    /// Spawn a loop that calls `emit` once per `period`, or earlier when woken.
    ///
    /// The first emission happens one full period after start. Returns
    /// immediately; the loop runs on the tokio runtime.
    pub fn start<F, Fut>(
        name: &'static str,
        session_id: SessionId,
        period: Duration,
        mut emit: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), PeerError>> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let wake = Arc::new(Notify::new());

        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            let wake = wake.clone();
            let session_id = session_id.clone();
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // interval() fires immediately; skip that tick
                ticker.tick().await;

                debug!(session_id = %session_id, notifier = name, "Notification loop started");

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                        _ = wake.notified() => {}
                    }

                    // Cancellation drops an in-flight emission; peers only
                    // ever accept whole messages.
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        result = emit() => result,
                    };

                    if let Err(e) = result {
                        debug!(
                            session_id = %session_id,
                            notifier = name,
                            error = %e,
                            "Send failed, stopping notification loop"
                        );
                        break;
                    }
                }

                debug!(session_id = %session_id, notifier = name, "Notification loop stopped");
            }
        });

        Self {
            name,
            session_id,
            shutdown,
            wake,
            handle: Some(handle),
        }
    }

    /// Run an emission now instead of waiting for the next tick
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the loop and wait for the task to finish.
    ///
    /// Once this returns the loop will not emit anything else.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(
                        session_id = %self.session_id,
                        notifier = self.name,
                        "Notification loop panicked"
                    );
                }
            }
        }
    }
}

impl Drop for NotificationLoop {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Loop sending `notifications/resources/updated` for every URI the session
/// is subscribed to
pub fn subscription_updates(
    session_id: SessionId,
    registry: Arc<SubscriptionRegistry>,
    peer: Arc<dyn Peer>,
    period: Duration,
) -> NotificationLoop {
    let id = session_id.clone();
    NotificationLoop::start("subscription-updates", session_id, period, move || {
        let registry = registry.clone();
        let peer = peer.clone();
        let id = id.clone();
        async move {
            let uris = registry.snapshot(&id).unwrap_or_default();
            for uri in &uris {
                peer.notify_resource_updated(uri).await?;
            }
            Ok(())
        }
    })
}

/// Loop cycling through every logging level, sending a sample message for
/// each level at or above the session's configured threshold
pub fn logging_updates(
    session_id: SessionId,
    level: watch::Receiver<LoggingLevel>,
    peer: Arc<dyn Peer>,
    period: Duration,
) -> NotificationLoop {
    let mut cursor = 0usize;
    NotificationLoop::start("logging-updates", session_id, period, move || {
        let candidate = LoggingLevel::ALL[cursor % LoggingLevel::ALL.len()];
        cursor = cursor.wrapping_add(1);
        let threshold = *level.borrow();
        let peer = peer.clone();
        async move {
            if candidate < threshold {
                return Ok(());
            }
            peer.log_message(LoggingMessageParams {
                level: candidate,
                logger: Some(LOGGER_NAME.to_string()),
                data: serde_json::Value::String(format!("{}-level message", candidate.label())),
            })
            .await
        }
    })
}
