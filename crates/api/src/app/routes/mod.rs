use axum::{routing::get, Router};

pub mod simulations;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/api/v1/simulations/queue", simulations::router())
}
