//! Driver-side registry of open sessions.

use dashmap::DashMap;

use crate::ids::SessionId;

/// Concurrent map from session id to the driver's per-session handle.
pub struct SessionRegistry<T> {
    sessions: DashMap<SessionId, T>,
}

impl<T: Clone> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: SessionId, handle: T) {
        self.sessions.insert(session, handle);
    }

    pub fn remove(&self, session: &SessionId) -> Option<T> {
        self.sessions.remove(session).map(|(_, handle)| handle)
    }

    pub fn handle(&self, session: &SessionId) -> Option<T> {
        self.sessions.get(session).map(|handle| handle.clone())
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|kv| *kv.key()).collect()
    }

    /// Removes every session, returning their handles.
    pub fn drain(&self) -> Vec<T> {
        let ids = self.ids();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<T: Clone> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
