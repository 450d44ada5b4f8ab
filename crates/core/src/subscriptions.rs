use crate::types::SessionId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Errors raised by the subscription registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("No active session: {0}")]
    UnknownSession(SessionId),
}

type SubscriptionSet = Arc<Mutex<BTreeSet<String>>>;

/// Tracks which resource URIs each active session has subscribed to.
///
/// The outer map is only locked long enough to look up or swap a session's
/// entry; membership changes lock the per-session set, so sessions never
/// contend with each other.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    sessions: RwLock<HashMap<SessionId, SubscriptionSet>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty subscription set for a session.
    ///
    /// Returns `false` and leaves the existing set untouched if the session
    /// is already registered.
    pub fn create_session(&self, session_id: &SessionId) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session_id) {
            tracing::debug!(session_id = %session_id, "Session already registered");
            return false;
        }
        sessions.insert(session_id.clone(), Arc::default());
        true
    }

    /// Remove a session, returning the URIs it was subscribed to
    pub fn destroy_session(&self, session_id: &SessionId) -> Option<BTreeSet<String>> {
        let set = self.sessions.write().remove(session_id)?;
        let uris = std::mem::take(&mut *set.lock());
        Some(uris)
    }

    /// Add a URI to a session's subscriptions.
    ///
    /// Returns `true` only when the URI was not already present.
    pub fn subscribe(
        &self,
        session_id: &SessionId,
        uri: impl Into<String>,
    ) -> Result<bool, SubscriptionError> {
        let set = self.session_set(session_id)?;
        let added = set.lock().insert(uri.into());
        Ok(added)
    }

    /// Remove a URI from a session's subscriptions.
    ///
    /// Removing a URI that was never subscribed is not an error; the return
    /// value says whether anything was removed.
    pub fn unsubscribe(&self, session_id: &SessionId, uri: &str) -> Result<bool, SubscriptionError> {
        let set = self.session_set(session_id)?;
        let removed = set.lock().remove(uri);
        Ok(removed)
    }

    /// Consistent copy of a session's subscriptions, in URI order
    pub fn snapshot(&self, session_id: &SessionId) -> Option<Vec<String>> {
        let set = self.session_set(session_id).ok()?;
        let uris = set.lock().iter().cloned().collect();
        Some(uris)
    }

    pub fn is_subscribed(&self, session_id: &SessionId, uri: &str) -> bool {
        self.session_set(session_id)
            .map(|set| set.lock().contains(uri))
            .unwrap_or(false)
    }

    pub fn contains_session(&self, session_id: &SessionId) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn session_set(&self, session_id: &SessionId) -> Result<SubscriptionSet, SubscriptionError> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SubscriptionError::UnknownSession(session_id.clone()))
    }
}
