//! `simbench-auth` — pure session/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage. Session lookup
//! and role assignment are owned by other systems; this crate only decides.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod session;

pub use authorize::{authorize, permissions_for_roles, AuthzError, RoleDirectory, StaticRoleDirectory};
pub use permissions::Permission;
pub use principal::Principal;
pub use roles::Role;
pub use session::{validate_session, Session, SessionValidationError};
