//! Session storage.
//!
//! Sessions map an opaque id to a user with a sliding expiry: every
//! authenticated request pushes `expires_at` out by the configured TTL.

use async_trait::async_trait;
use chrono::Duration;

use simbench_auth::Session;
use simbench_core::UserId;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemorySessionStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisSessionStore;

/// Default sliding TTL.
pub fn default_session_ttl() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session backend unavailable: {0}")]
    Backend(String),
    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Issue a new session for `user_id`.
    async fn create(&self, user_id: UserId) -> Result<Session, SessionStoreError>;

    /// Look up a live session. Expired or unknown ids yield `None`.
    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError>;

    /// Extend the expiry of a live session; returns the refreshed session.
    async fn touch(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError>;

    async fn revoke(&self, session_id: &str) -> Result<(), SessionStoreError>;
}

pub(crate) fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
