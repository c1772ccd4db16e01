//! API-side permission guard.
//!
//! Handlers call [`require`] before touching the job store.

use axum::http::StatusCode;
use axum::response::Response;

use simbench_auth::{authorize, Permission};

use crate::app::errors;
use crate::context::PrincipalContext;

pub fn require(principal: &PrincipalContext, permission: &Permission) -> Result<(), Response> {
    authorize(principal.principal(), permission).map_err(|e| {
        tracing::debug!(user_id = %principal.user_id(), permission = %permission, "permission denied");
        errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    })
}
