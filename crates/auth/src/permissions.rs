use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "simulations.read").
/// A special wildcard permission `"*"` can be used by policy layers to indicate
/// "allow all" without hardcoding permissions into roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permissions guarding the simulation queue.
pub mod simulations {
    use super::Permission;

    pub const CREATE: Permission = Permission::from_static("simulations.create");
    pub const READ: Permission = Permission::from_static("simulations.read");
    pub const CANCEL: Permission = Permission::from_static("simulations.cancel");
    pub const STATS: Permission = Permission::from_static("simulations.stats");

    pub fn all() -> Vec<Permission> {
        vec![CREATE, READ, CANCEL, STATS]
    }
}
