use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use simbench_auth::{validate_session, Session};
use simbench_core::UserId;

use super::{new_session_id, SessionStore, SessionStoreError, default_session_ttl};

/// In-memory session store for tests/dev.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Register a session under a known id (fixtures, dev logins).
    pub fn insert_session(&self, session_id: impl Into<String>, user_id: UserId) -> Result<Session, SessionStoreError> {
        let now = Utc::now();
        let session = Session {
            session_id: session_id.into(),
            user_id,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.write()?
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Session>>, SessionStoreError> {
        self.sessions
            .write()
            .map_err(|_| SessionStoreError::Backend("session lock poisoned".to_string()))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(default_session_ttl())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, user_id: UserId) -> Result<Session, SessionStoreError> {
        self.insert_session(new_session_id(), user_id)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let mut sessions = self.write()?;
        let Some(session) = sessions.get(session_id) else {
            return Ok(None);
        };
        if validate_session(session, Utc::now()).is_err() {
            sessions.remove(session_id);
            return Ok(None);
        }
        Ok(Some(session.clone()))
    }

    async fn touch(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let now = Utc::now();
        let mut sessions = self.write()?;
        match sessions.get_mut(session_id) {
            Some(session) if validate_session(session, now).is_ok() => {
                session.expires_at = now + self.ttl;
                Ok(Some(session.clone()))
            }
            Some(_) => {
                sessions.remove(session_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn revoke(&self, session_id: &str) -> Result<(), SessionStoreError> {
        self.write()?.remove(session_id);
        Ok(())
    }
}
