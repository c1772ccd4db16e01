use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use simbench_auth::permissions::simulations as perms;
use simbench_core::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::require;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs).post(enqueue_job))
        .route("/stats", get(queue_stats))
        .route("/:id", get(get_job).delete(cancel_job))
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(errors::domain_error_to_response)
}

pub async fn enqueue_job(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &perms::CREATE) {
        return resp;
    }
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.body_text());
        }
    };

    match services.jobs.enqueue(body.into_new_job(principal.user_id())).await {
        Ok(job) => {
            tracing::info!(
                job_id = %job.id,
                user_id = %job.user_id,
                service_id = %job.service_id,
                priority = job.priority.get(),
                "simulation queued"
            );
            (StatusCode::CREATED, Json(dto::JobResponse { job })).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &perms::READ) {
        return resp;
    }
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.get_job(job_id).await {
        Ok(Some(job)) => Json(dto::JobResponse { job }).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {job_id} not found"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &perms::READ) {
        return resp;
    }
    let filter = match query.filter_for(principal.user_id()) {
        Ok(f) => f,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.jobs.list_jobs(&filter, query.pagination()).await {
        Ok(page) => Json(dto::JobListResponse {
            jobs: page.jobs,
            total: page.total,
        })
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn cancel_job(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &perms::CANCEL) {
        return resp;
    }
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.cancel_job(job_id).await {
        Ok(job) => {
            tracing::info!(job_id = %job.id, user_id = %principal.user_id(), "simulation cancelled");
            Json(dto::CancelJobResponse {
                message: "job cancelled",
                job,
            })
            .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn queue_stats(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &perms::STATS) {
        return resp;
    }

    match services.jobs.queue_stats().await {
        Ok(stats) => Json(dto::QueueStatsResponse {
            total: stats.total(),
            stats,
        })
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
