// Concurrent store of live sessions keyed by id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::events::SessionId;
use super::session::Session;

/// Live (pending or running) sessions.
///
/// Every mutation goes through one lock. [`SessionRegistry::take`] is the only
/// way out of the map, so of two racing removers exactly one gets the session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. Ids are never reused, so an existing entry is a bug
    /// in the caller; the original entry is kept and `false` returned.
    pub fn insert(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session.id()) {
            return false;
        }
        sessions.insert(session.id().clone(), session);
        true
    }

    /// Atomically remove and return the session, if still present.
    pub fn take(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().remove(id)
    }

    /// Remove every session at once.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().drain().map(|(_, s)| s).collect()
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Snapshot of the ids present right now, in no particular order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
