use serde::{Deserialize, Serialize};

use simbench_core::{DomainResult, UserId};
use simbench_infra::jobs::{Job, JobFilter, JobStatus, NewJob, Pagination, QueueStats};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub service_id: String,
    pub llm_provider: Option<String>,
    pub prompt_version_id: Option<i64>,
    pub current_config: Option<serde_json::Value>,
    pub proposed_config: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub options: Option<serde_json::Value>,
    pub priority: Option<i64>,
}

impl CreateJobRequest {
    pub fn into_new_job(self, user_id: UserId) -> NewJob {
        NewJob {
            user_id,
            service_id: self.service_id,
            llm_provider: self.llm_provider,
            prompt_version_id: self.prompt_version_id,
            current_config: self.current_config,
            proposed_config: self.proposed_config,
            context: self.context,
            options: self.options,
            priority: self.priority,
        }
    }
}

/// Raw list query. Numbers stay strings so malformed values fall back to
/// defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListJobsQuery {
    /// Build the requester-scoped filter. Unknown statuses are rejected.
    pub fn filter_for(&self, user_id: UserId) -> DomainResult<JobFilter> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(s.parse::<JobStatus>()?),
        };
        Ok(JobFilter::for_user(user_id).with_status(status))
    }

    pub fn pagination(&self) -> Pagination {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
        Pagination::new(parse(&self.limit), parse(&self.offset))
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: Job,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub message: &'static str,
    pub job: Job,
}

#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    pub stats: QueueStats,
    pub total: i64,
}
