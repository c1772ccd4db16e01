use simbench_auth::{Principal, Role};
use simbench_core::UserId;

/// Principal context for a request (authenticated user + roles + permissions).
///
/// Inserted by the session middleware; present on every protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    session_id: String,
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(session_id: impl Into<String>, principal: Principal) -> Self {
        Self {
            session_id: session_id.into(),
            principal,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.principal.roles
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
