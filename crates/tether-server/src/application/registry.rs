//! Concurrent session registry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use tether_core::SessionId;

use super::session::Session;

/// Every live session, keyed by id.
///
/// Backed by a sharded concurrent map: lookups for different sessions do not
/// contend, and no lock is held while a caller works with a session.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    diagnostic_retention: Duration,
}

impl SessionRegistry {
    pub fn new(diagnostic_retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            diagnostic_retention,
        }
    }

    /// Allocates a fresh session in buffering mode and registers it.
    pub fn create(&self) -> Arc<Session> {
        use dashmap::mapref::entry::Entry;

        loop {
            let id = SessionId::generate();
            if let Entry::Vacant(entry) = self.sessions.entry(id.clone()) {
                let session = Arc::new(Session::new(id, self.diagnostic_retention));
                entry.insert(Arc::clone(&session));
                info!(session = %session.id(), "session created");
                return session;
            }
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Snapshot of every registered session.
    ///
    /// Sessions created after the snapshot is taken are not included.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Unregisters a session.  The caller is responsible for tearing it down.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            debug!(session = %id, "session removed from registry");
        }
        removed
    }

    /// Removes and tears down every session whose peer never connected
    /// within `max_age`.  Returns the ids that were reaped.
    pub fn reap_abandoned(&self, max_age: Duration) -> Vec<SessionId> {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|r| r.value().is_abandoned(max_age))
            .map(|r| r.key().clone())
            .collect();
        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(session) = self.remove(&id) {
                session.teardown();
                info!(session = %id, "peer never connected; session discarded");
                reaped.push(id);
            }
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
