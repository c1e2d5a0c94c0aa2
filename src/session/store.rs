//! In-memory indexed collection of live sessions.
//!
//! Sessions do not survive a process restart; the store is a simple
//! lock-guarded map with a secondary lookup by consumer and service
//! type.

use crate::identity::Identity;
use crate::session::Session;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Secondary-lookup options for [`SessionStore::find_by`].
#[derive(Debug, Clone, Copy)]
pub struct FindOpts<'a> {
    /// Consumer the session belongs to.
    pub peer: Option<&'a Identity>,
    /// Service type of the session's proposal.
    pub service_type: &'a str,
}

/// Indexed collection of live sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. A duplicate id overwrites the previous entry;
    /// the caller has already evicted any stale session.
    pub fn add(&self, session: Session) {
        self.inner.write().insert(session.id.clone(), session);
    }

    /// Look up a session by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<Session> {
        self.inner.read().get(id).cloned()
    }

    /// Look up a session by consumer and service type.
    ///
    /// At most one match is expected under the one-session-per-pair
    /// invariant; ties are not specified.
    #[must_use]
    pub fn find_by(&self, opts: FindOpts<'_>) -> Option<Session> {
        self.inner
            .read()
            .values()
            .find(|session| {
                opts.peer.is_none_or(|peer| session.consumer_id == *peer)
                    && session.proposal.service_type == opts.service_type
            })
            .cloned()
    }

    /// Remove a session by id. Idempotent.
    pub fn remove(&self, id: &str) {
        self.inner.write().remove(id);
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
