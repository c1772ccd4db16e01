//! Postgres-backed job store.
//!
//! ## Claim
//!
//! The claim is a single statement:
//!
//! ```sql
//! UPDATE simulation_jobs SET status = 'running', ...
//! WHERE id = (SELECT id FROM simulation_jobs WHERE status = 'pending'
//!             ORDER BY priority DESC, queued_at ASC, id ASC
//!             LIMIT 1 FOR UPDATE SKIP LOCKED)
//! RETURNING ...
//! ```
//!
//! `SKIP LOCKED` makes a concurrent claimer pass over a row another
//! transaction has locked, so N workers obtain distinct jobs (or none)
//! without waiting on each other.
//!
//! ## Terminal writes
//!
//! Completion, failure and cancellation are conditional on the current
//! status (`running` or `pending`). When the conditional update matches no
//! row, a follow-up lookup tells `NotFound` apart from `Conflict`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (check constraint violation) | `23514` | `Validation` |
//! | Database (not-null violation) | `23502` | `Validation` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Storage` |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, instrument};

use simbench_core::{JobId, UserId};

use super::store::{JobFilter, JobPage, JobStore, JobStoreError, Pagination, QueueStats};
use super::types::{Job, JobStatus, NewJob, Priority};

const JOB_COLUMNS: &str = "id, user_id, service_id, llm_provider, prompt_version_id, \
     current_config, proposed_config, context, options, status, priority, result, \
     error_message, queued_at, started_at, completed_at, created_at, updated_at";

/// Postgres-backed simulation queue.
///
/// `Send + Sync`; clones share the underlying pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, JobStoreError> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::connect_with(options, max_connections).await
    }

    /// Open a pool from discrete connection options.
    pub async fn connect_with(
        options: PgConnectOptions,
        max_connections: u32,
    ) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| JobStoreError::Storage(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolve why a conditional update matched nothing.
    async fn explain_miss(&self, job_id: JobId, expected: JobStatus) -> JobStoreError {
        let status = sqlx::query("SELECT status FROM simulation_jobs WHERE id = $1")
            .bind(job_id.get())
            .fetch_optional(&*self.pool)
            .await;

        match status {
            Ok(None) => JobStoreError::NotFound(job_id),
            Ok(Some(row)) => status_conflict(job_id, expected, row.try_get("status")),
            Err(e) => map_sqlx_error("explain_miss", e),
        }
    }

    /// Shared body of the guarded status updates.
    async fn guarded_update(
        &self,
        operation: &'static str,
        job_id: JobId,
        expected: JobStatus,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Job, JobStoreError> {
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.explain_miss(job_id, expected).await),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, input), fields(user_id = %input.user_id, service_id = %input.service_id), err)]
    async fn enqueue(&self, input: NewJob) -> Result<Job, JobStoreError> {
        let spec = input.validate()?;

        let sql = format!(
            r#"
            INSERT INTO simulation_jobs (
                user_id, service_id, llm_provider, prompt_version_id,
                current_config, proposed_config, context, options,
                status, priority, queued_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, NOW(), NOW(), NOW())
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(spec.user_id.get())
            .bind(&spec.service_id)
            .bind(&spec.llm_provider)
            .bind(spec.prompt_version_id)
            .bind(&spec.current_config)
            .bind(&spec.proposed_config)
            .bind(&spec.context)
            .bind(&spec.options)
            .bind(i32::from(spec.priority.get()))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;

        let job = job_from_row(&row)?;
        debug!(job_id = %job.id, priority = job.priority.get(), "job enqueued");
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn claim_next_ready(&self) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE simulation_jobs
            SET status = 'running', started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM simulation_jobs
                WHERE status = 'pending'
                ORDER BY priority DESC, queued_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next_ready", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, result), fields(job_id = %job_id), err)]
    async fn mark_completed(
        &self,
        job_id: JobId,
        result: serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE simulation_jobs
            SET status = 'completed', result = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let query = sqlx::query(&sql).bind(job_id.get()).bind(&result);
        self.guarded_update("mark_completed", job_id, JobStatus::Running, query)
            .await
    }

    #[instrument(skip(self, error_message), fields(job_id = %job_id), err)]
    async fn mark_failed(&self, job_id: JobId, error_message: String) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE simulation_jobs
            SET status = 'failed', error_message = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let query = sqlx::query(&sql).bind(job_id.get()).bind(&error_message);
        self.guarded_update("mark_failed", job_id, JobStatus::Running, query)
            .await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn cancel_job(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE simulation_jobs
            SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let query = sqlx::query(&sql).bind(job_id.get());
        self.guarded_update("cancel_job", job_id, JobStatus::Pending, query)
            .await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM simulation_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(limit = page.limit, offset = page.offset), err)]
    async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: Pagination,
    ) -> Result<JobPage, JobStoreError> {
        let user_id = filter.user_id.map(|u| u.get());
        let status = filter.status.map(|s| s.as_str());

        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM simulation_jobs
            WHERE ($1::bigint IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY priority DESC, queued_at ASC, id ASC
            LIMIT $3 OFFSET $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(status)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM simulation_jobs
            WHERE ($1::bigint IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs_count", e))?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage { jobs, total })
    }

    #[instrument(skip(self), err)]
    async fn queue_stats(&self) -> Result<QueueStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM simulation_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("queue_stats", e))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("queue_stats", e))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| map_sqlx_error("queue_stats", e))?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Storage(e.to_string()))?;
            stats.record(status, count);
        }
        Ok(stats)
    }
}

/// Map SQLx errors onto store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // check / not-null violation
                Some("23514") | Some("23502") => JobStoreError::Validation(msg),
                _ => JobStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Storage(format!("connection pool timed out in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Conflict for a row found in another status; a status that fails to
/// decode is a storage fault, not a conflict.
fn status_conflict(
    job_id: JobId,
    expected: JobStatus,
    current: Result<String, sqlx::Error>,
) -> JobStoreError {
    match current {
        Ok(current) => {
            JobStoreError::Conflict(format!("job {job_id} is {current}, expected {expected}"))
        }
        Err(e) => map_sqlx_error("explain_miss", e),
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: i64,
    user_id: i64,
    service_id: String,
    llm_provider: Option<String>,
    prompt_version_id: Option<i64>,
    current_config: serde_json::Value,
    proposed_config: serde_json::Value,
    context: Option<serde_json::Value>,
    options: Option<serde_json::Value>,
    status: String,
    priority: i32,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            service_id: row.try_get("service_id")?,
            llm_provider: row.try_get("llm_provider")?,
            prompt_version_id: row.try_get("prompt_version_id")?,
            current_config: row.try_get("current_config")?,
            proposed_config: row.try_get("proposed_config")?,
            context: row.try_get("context")?,
            options: row.try_get("options")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            queued_at: row.try_get("queued_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| JobStoreError::Storage(format!("job {}: {}", row.id, e)))?;

        Ok(Job {
            id: JobId::new(row.id),
            user_id: UserId::new(row.user_id),
            service_id: row.service_id,
            llm_provider: row.llm_provider,
            prompt_version_id: row.prompt_version_id,
            current_config: row.current_config,
            proposed_config: row.proposed_config,
            context: row.context,
            options: row.options,
            status,
            priority: Priority::clamped(i64::from(row.priority)),
            result: row.result,
            error_message: row.error_message,
            queued_at: row.queued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let row = JobRow::from_row(row)
        .map_err(|e| JobStoreError::Storage(format!("failed to deserialize job row: {}", e)))?;
    row.try_into()
}

/// The `#[ignore]`d tests need a live Postgres; run with
/// `DATABASE_URL=postgres://... cargo test -p simbench-infra -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn miss_on_other_status_is_a_conflict() {
        let err = status_conflict(JobId::new(7), JobStatus::Running, Ok("completed".to_string()));
        match err {
            JobStoreError::Conflict(msg) => assert_eq!(msg, "job 7 is completed, expected running"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_status_is_a_storage_error() {
        let err = status_conflict(
            JobId::new(7),
            JobStatus::Running,
            Err(sqlx::Error::ColumnNotFound("status".to_string())),
        );
        match err {
            JobStoreError::Storage(msg) => {
                assert!(msg.contains("explain_miss"), "{msg}");
                assert!(msg.contains("status"), "{msg}");
            }
            other => panic!("expected storage error, got {other:?}"),
        }
    }

    async fn store() -> PostgresJobStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PostgresJobStore::connect(&url, 10).await.unwrap();
        store.migrate().await.unwrap();
        sqlx::query("TRUNCATE simulation_jobs RESTART IDENTITY")
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    fn new_job(priority: i64) -> NewJob {
        NewJob::new(UserId::new(1), "svc1", json!({"a": 1}), json!({"a": 2})).with_priority(priority)
    }

    // Both tests truncate the same table, so they cannot share a run.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL"]
    async fn postgres_claim_lifecycle_and_concurrency() {
        let store = store().await;
        for p in [10, 90, 50] {
            store.enqueue(new_job(p)).await.unwrap();
        }

        let first = store.claim_next_ready().await.unwrap().unwrap();
        assert_eq!(first.priority.get(), 90);
        assert_eq!(first.status, JobStatus::Running);

        let done = store
            .mark_completed(first.id, json!({"verdict": "approved"}))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(matches!(
            store.mark_failed(first.id, "late".into()).await,
            Err(JobStoreError::Conflict(_))
        ));
        assert!(matches!(
            store.cancel_job(JobId::new(10_000)).await,
            Err(JobStoreError::NotFound(_))
        ));

        for _ in 0..8 {
            store.enqueue(new_job(50)).await.unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim_next_ready().await }));
        }
        let mut ids = HashSet::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap().unwrap() {
                assert!(ids.insert(job.id));
            }
        }
        // 2 leftovers from the first batch plus 8 new ones.
        assert_eq!(ids.len(), 10);

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.total(), 11);
        assert_eq!(stats.running, 10);
    }
}
