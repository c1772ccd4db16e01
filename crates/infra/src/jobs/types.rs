//! Core job types and status transitions.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simbench_core::{DomainError, DomainResult, JobId, UserId};

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by a worker and being evaluated
    Running,
    /// Evaluation succeeded; `result` is set
    Completed,
    /// Evaluation failed; `error_message` is set
    Failed,
    /// Cancelled while still pending
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal lifecycle edge.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            (JobStatus::Pending, _)
            | (JobStatus::Running, _)
            | (JobStatus::Completed, _)
            | (JobStatus::Failed, _)
            | (JobStatus::Cancelled, _) => false,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown job status '{other}' (expected one of: pending, running, completed, failed, cancelled)"
            ))),
        }
    }
}

/// Scheduling priority in `[0, 100]`; higher is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(100);
    pub const DEFAULT: Priority = Priority(50);

    /// Clamp an arbitrary integer into range.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(Self::MIN.0 as i64, Self::MAX.0 as i64) as u8)
    }

    /// `None` means "not given" and maps to [`Priority::DEFAULT`].
    pub fn from_request(value: Option<i64>) -> Self {
        value.map(Self::clamped).unwrap_or_default()
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Enqueue input, as received from the API.
///
/// Config payloads are optional here so that a missing payload is a
/// validation error rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub user_id: UserId,
    pub service_id: String,
    pub llm_provider: Option<String>,
    pub prompt_version_id: Option<i64>,
    pub current_config: Option<serde_json::Value>,
    pub proposed_config: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub options: Option<serde_json::Value>,
    pub priority: Option<i64>,
}

impl NewJob {
    pub fn new(
        user_id: UserId,
        service_id: impl Into<String>,
        current_config: serde_json::Value,
        proposed_config: serde_json::Value,
    ) -> Self {
        Self {
            user_id,
            service_id: service_id.into(),
            llm_provider: None,
            prompt_version_id: None,
            current_config: Some(current_config),
            proposed_config: Some(proposed_config),
            context: None,
            options: None,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_llm_provider(mut self, provider: impl Into<String>) -> Self {
        self.llm_provider = Some(provider.into());
        self
    }

    pub fn with_prompt_version(mut self, prompt_version_id: i64) -> Self {
        self.prompt_version_id = Some(prompt_version_id);
        self
    }

    /// Validate the input and normalise its priority.
    ///
    /// A config payload that is absent or JSON `null` is missing.
    pub fn validate(self) -> DomainResult<JobSpec> {
        if self.service_id.trim().is_empty() {
            return Err(DomainError::validation("service_id is required"));
        }
        let current_config = present(self.current_config)
            .ok_or_else(|| DomainError::validation("current_config is required"))?;
        let proposed_config = present(self.proposed_config)
            .ok_or_else(|| DomainError::validation("proposed_config is required"))?;

        Ok(JobSpec {
            user_id: self.user_id,
            service_id: self.service_id,
            llm_provider: self.llm_provider,
            prompt_version_id: self.prompt_version_id,
            current_config,
            proposed_config,
            context: present(self.context),
            options: present(self.options),
            priority: Priority::from_request(self.priority),
        })
    }
}

fn present(value: Option<serde_json::Value>) -> Option<serde_json::Value> {
    value.filter(|v| !v.is_null())
}

/// Validated, immutable job payload ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub user_id: UserId,
    pub service_id: String,
    pub llm_provider: Option<String>,
    pub prompt_version_id: Option<i64>,
    pub current_config: serde_json::Value,
    pub proposed_config: serde_json::Value,
    pub context: Option<serde_json::Value>,
    pub options: Option<serde_json::Value>,
    pub priority: Priority,
}

impl JobSpec {
    /// Materialise as a freshly queued job.
    pub fn into_pending(self, id: JobId, now: DateTime<Utc>) -> Job {
        Job {
            id,
            user_id: self.user_id,
            service_id: self.service_id,
            llm_provider: self.llm_provider,
            prompt_version_id: self.prompt_version_id,
            current_config: self.current_config,
            proposed_config: self.proposed_config,
            context: self.context,
            options: self.options,
            status: JobStatus::Pending,
            priority: self.priority,
            result: None,
            error_message: None,
            queued_at: now,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A queued simulation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub service_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_version_id: Option<i64>,
    pub current_config: serde_json::Value,
    pub proposed_config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,

    pub status: JobStatus,
    pub priority: Priority,

    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,

    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rejected lifecycle edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Job {
    fn transition(&mut self, to: JobStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// `pending -> running`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running, now)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// `running -> completed`.
    pub fn mark_completed(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed, now)?;
        self.result = Some(result);
        self.completed_at = Some(now);
        Ok(())
    }

    /// `running -> failed`.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed, now)?;
        self.error_message = Some(error);
        self.completed_at = Some(now);
        Ok(())
    }

    /// `pending -> cancelled`.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled, now)?;
        self.completed_at = Some(now);
        Ok(())
    }
}
