//! Job storage abstraction and the in-memory implementation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use simbench_core::{DomainError, JobId, UserId};

use super::types::{Job, JobStatus, NewJob, TransitionError};

/// Persistence contract for the simulation queue.
///
/// `claim_next_ready` must be safe under any number of concurrent callers:
/// two claimers never receive the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Validate and persist a new `pending` job.
    async fn enqueue(&self, input: NewJob) -> Result<Job, JobStoreError>;

    /// Atomically move the best pending job to `running`.
    /// Returns `None` when nothing is pending.
    async fn claim_next_ready(&self) -> Result<Option<Job>, JobStoreError>;

    /// `running -> completed`.
    async fn mark_completed(
        &self,
        job_id: JobId,
        result: serde_json::Value,
    ) -> Result<Job, JobStoreError>;

    /// `running -> failed`.
    async fn mark_failed(&self, job_id: JobId, error_message: String) -> Result<Job, JobStoreError>;

    /// `pending -> cancelled`.
    async fn cancel_job(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Jobs matching `filter` in claim order, plus the unpaginated match count.
    async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: Pagination,
    ) -> Result<JobPage, JobStoreError>;

    async fn queue_stats(&self) -> Result<QueueStats, JobStoreError>;
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn enqueue(&self, input: NewJob) -> Result<Job, JobStoreError> {
        (**self).enqueue(input).await
    }

    async fn claim_next_ready(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next_ready().await
    }

    async fn mark_completed(
        &self,
        job_id: JobId,
        result: serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        (**self).mark_completed(job_id, result).await
    }

    async fn mark_failed(&self, job_id: JobId, error_message: String) -> Result<Job, JobStoreError> {
        (**self).mark_failed(job_id, error_message).await
    }

    async fn cancel_job(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).cancel_job(job_id).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get_job(job_id).await
    }

    async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: Pagination,
    ) -> Result<JobPage, JobStoreError> {
        (**self).list_jobs(filter, page).await
    }

    async fn queue_stats(&self) -> Result<QueueStats, JobStoreError> {
        (**self).queue_stats().await
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for JobStoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound => Self::Storage("unexpected not-found from domain".to_string()),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<TransitionError> for JobStoreError {
    fn from(err: TransitionError) -> Self {
        Self::Conflict(err.to_string())
    }
}

/// List filter; `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub user_id: Option<UserId>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            status: None,
        }
    }

    pub fn with_status(mut self, status: Option<JobStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.user_id.is_none_or(|u| job.user_id == u) && self.status.is_none_or(|s| job.status == s)
    }
}

/// Limit/offset window for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Non-positive limits fall back to the default; negative offsets to zero.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l.min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        };
        let offset = offset.filter(|o| *o >= 0).unwrap_or(0);
        Self { limit, offset }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn record(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// Claim order: priority DESC, queued_at ASC, id ASC.
pub fn claim_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.queued_at.cmp(&b.queued_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Default)]
struct Inner {
    jobs: BTreeMap<JobId, Job>,
    next_id: i64,
}

/// In-memory job store for tests/dev.
///
/// A single mutex serialises every operation, which gives the claim the same
/// disjointness guarantee the row-locking Postgres claim provides.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, JobStoreError> {
        self.inner
            .lock()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn update<F>(&self, job_id: JobId, apply: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), TransitionError>,
    {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        // Work on a copy so a rejected transition leaves the stored job untouched.
        let mut next = job.clone();
        apply(&mut next)?;
        *job = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, input: NewJob) -> Result<Job, JobStoreError> {
        let spec = input.validate()?;
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let job = spec.into_pending(JobId::new(inner.next_id), Utc::now());
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim_next_ready(&self) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.lock()?;
        let next = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| claim_order(a, b))
            .map(|j| j.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        job.mark_running(Utc::now())?;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(
        &self,
        job_id: JobId,
        result: serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| job.mark_completed(result, Utc::now()))
    }

    async fn mark_failed(&self, job_id: JobId, error_message: String) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| job.mark_failed(error_message, Utc::now()))
    }

    async fn cancel_job(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| job.mark_cancelled(Utc::now()))
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.lock()?.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: Pagination,
    ) -> Result<JobPage, JobStoreError> {
        let inner = self.lock()?;
        let mut matching: Vec<&Job> = inner.jobs.values().filter(|j| filter.matches(j)).collect();
        matching.sort_by(|a, b| claim_order(a, b));

        let total = matching.len() as i64;
        let jobs = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();
        Ok(JobPage { jobs, total })
    }

    async fn queue_stats(&self) -> Result<QueueStats, JobStoreError> {
        let inner = self.lock()?;
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}
