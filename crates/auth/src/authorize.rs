use std::collections::{HashMap, HashSet};

use thiserror::Error;

use simbench_core::UserId;

use crate::permissions::simulations;
use crate::{Permission, Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal for a single permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Role → permission policy.
///
/// `admin` grants the wildcard; `simulator` grants the simulation queue
/// permissions; unknown roles grant nothing.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for role in roles {
        let granted = match role.as_str() {
            "admin" => vec![Permission::new("*")],
            "simulator" => simulations::all(),
            _ => Vec::new(),
        };
        for perm in granted {
            if !out.contains(&perm) {
                out.push(perm);
            }
        }
    }
    out
}

/// Source of role assignments for users.
///
/// The real assignment tables live in the RBAC service; the queue only needs
/// to ask which roles a user holds.
pub trait RoleDirectory: Send + Sync {
    fn roles_for(&self, user_id: UserId) -> Vec<Role>;
}

/// Fixed role assignments with a fallback for unlisted users.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleDirectory {
    assignments: HashMap<UserId, Vec<Role>>,
    default_roles: Vec<Role>,
}

impl StaticRoleDirectory {
    pub fn new(default_roles: Vec<Role>) -> Self {
        Self {
            assignments: HashMap::new(),
            default_roles,
        }
    }

    pub fn with_roles(mut self, user_id: UserId, roles: Vec<Role>) -> Self {
        self.assignments.insert(user_id, roles);
        self
    }
}

impl RoleDirectory for StaticRoleDirectory {
    fn roles_for(&self, user_id: UserId) -> Vec<Role> {
        self.assignments
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| self.default_roles.clone())
    }
}
