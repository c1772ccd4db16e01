//! Redis-backed session store.
//!
//! Key layout: `session:{id}` holds the JSON session record; the key's own
//! expiry mirrors `expires_at`, so Redis evicts dead sessions.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use redis::aio::MultiplexedConnection;

use simbench_auth::{validate_session, Session};
use simbench_core::UserId;

use super::{new_session_id, SessionStore, SessionStoreError, default_session_ttl};

const KEY_PREFIX: &str = "session:";

pub struct RedisSessionStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisSessionStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, SessionStoreError> {
        Self::with_ttl(redis_url, default_session_ttl())
    }

    pub fn with_ttl(redis_url: impl AsRef<str>, ttl: Duration) -> Result<Self, SessionStoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| SessionStoreError::Backend(format!("invalid redis url: {e}")))?;
        Ok(Self { client, ttl })
    }

    fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }

    async fn conn(&self) -> Result<MultiplexedConnection, SessionStoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)
    }

    async fn write(
        &self,
        conn: &mut MultiplexedConnection,
        session: &Session,
    ) -> Result<(), SessionStoreError> {
        let payload = serde_json::to_string(session)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        redis::cmd("SET")
            .arg(Self::key(&session.session_id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl.num_seconds().max(1))
            .query_async::<_, ()>(conn)
            .await
            .map_err(map_redis_error)
    }

    async fn read(
        &self,
        conn: &mut MultiplexedConnection,
        session_id: &str,
    ) -> Result<Option<Session>, SessionStoreError> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(session_id))
            .query_async(conn)
            .await
            .map_err(map_redis_error)?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let session: Session =
            serde_json::from_str(&raw).map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        if validate_session(&session, Utc::now()).is_err() {
            return Ok(None);
        }
        Ok(Some(session))
    }
}

fn map_redis_error(err: redis::RedisError) -> SessionStoreError {
    SessionStoreError::Backend(err.to_string())
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, user_id: UserId) -> Result<Session, SessionStoreError> {
        let now = Utc::now();
        let session = Session {
            session_id: new_session_id(),
            user_id,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let mut conn = self.conn().await?;
        self.write(&mut conn, &session).await?;
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let mut conn = self.conn().await?;
        self.read(&mut conn, session_id).await
    }

    async fn touch(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let mut conn = self.conn().await?;
        let Some(mut session) = self.read(&mut conn, session_id).await? else {
            return Ok(None);
        };
        session.expires_at = Utc::now() + self.ttl;
        self.write(&mut conn, &session).await?;
        Ok(Some(session))
    }

    async fn revoke(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(Self::key(session_id))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }
}
