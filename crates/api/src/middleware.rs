use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use simbench_auth::{Principal, RoleDirectory};
use simbench_infra::sessions::SessionStore;

use crate::app::errors;
use crate::context::PrincipalContext;

pub const SESSION_COOKIE: &str = "session_id";

#[derive(Clone)]
pub struct AuthState {
    pub sessions: Arc<dyn SessionStore>,
    pub roles: Arc<dyn RoleDirectory>,
}

/// Resolve the session, slide its expiry and attach a [`PrincipalContext`].
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let session_id = extract_session_id(req.headers()).ok_or_else(unauthorized)?;

    let session = state
        .sessions
        .touch(&session_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "session lookup failed");
            errors::json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "session store unavailable",
            )
        })?
        .ok_or_else(unauthorized)?;

    let roles = state.roles.roles_for(session.user_id);
    req.extensions_mut().insert(PrincipalContext::new(
        session.session_id,
        Principal::new(session.user_id, roles),
    ));

    Ok(next.run(req).await)
}

/// One log line per request.
pub async fn request_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let res = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        status = res.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    res
}

fn unauthorized() -> Response {
    errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "authentication required")
}

/// Cookie first, then `Authorization: Bearer`.
fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    from_cookie(headers).or_else(|| from_bearer(headers))
}

fn from_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn from_bearer(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
