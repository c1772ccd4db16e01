use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use simbench_core::UserId;

/// Authenticated session (transport-agnostic).
///
/// The session store owns issuance and expiry; by the time a `Session` reaches
/// this crate it has been looked up by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionValidationError {
    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (created_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= created_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate a session's time window.
pub fn validate_session(session: &Session, now: DateTime<Utc>) -> Result<(), SessionValidationError> {
    if session.expires_at <= session.created_at {
        return Err(SessionValidationError::InvalidTimeWindow);
    }
    if now < session.created_at {
        return Err(SessionValidationError::NotYetValid);
    }
    if now >= session.expires_at {
        return Err(SessionValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(created_at: DateTime<Utc>, ttl: Duration) -> Session {
        Session {
            session_id: "s".to_string(),
            user_id: UserId::new(1),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    #[test]
    fn live_session_is_valid() {
        let now = Utc::now();
        let s = session(now - Duration::minutes(1), Duration::hours(24));
        assert_eq!(validate_session(&s, now), Ok(()));
    }

    #[test]
    fn expired_session_is_rejected() {
        let now = Utc::now();
        let s = session(now - Duration::hours(25), Duration::hours(24));
        assert_eq!(validate_session(&s, now), Err(SessionValidationError::Expired));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let now = Utc::now();
        let s = session(now, Duration::seconds(-5));
        assert_eq!(
            validate_session(&s, now),
            Err(SessionValidationError::InvalidTimeWindow)
        );
    }
}
