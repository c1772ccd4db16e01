use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use simbench_core::DomainError;
use simbench_infra::jobs::JobStoreError;

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        JobStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "job store unavailable");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "job store unavailable",
            )
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
