use std::collections::HashMap;
use std::sync::RwLock;

use bastion_auth::{SessionStore, StoreError};
use bastion_core::{IdentityId, SessionId};

/// In-memory login sessions for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, IdentityId>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl SessionStore for InMemorySessionStore {
    fn current(&self, session: SessionId) -> Result<Option<IdentityId>, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(sessions.get(&session).copied())
    }

    fn login(&self, identity: IdentityId) -> Result<SessionId, StoreError> {
        let session = SessionId::new();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        sessions.insert(session, identity);
        Ok(session)
    }

    fn logout(&self, session: SessionId) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        sessions.remove(&session);
        Ok(())
    }
}
