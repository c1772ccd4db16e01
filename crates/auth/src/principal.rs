use simbench_core::UserId;

use crate::{Permission, Role};

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from storage and transport: the API derives it
/// from a validated session plus a [`crate::RoleDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        let permissions = crate::permissions_for_roles(&roles);
        Self {
            user_id,
            roles,
            permissions,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == &Role::ADMIN)
    }
}
