use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are intentionally opaque strings at this layer; mapping roles to
/// permissions is done by [`crate::permissions_for_roles`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Grants every permission.
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    /// May submit, inspect and cancel simulations.
    pub const SIMULATOR: Role = Role(Cow::Borrowed("simulator"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
