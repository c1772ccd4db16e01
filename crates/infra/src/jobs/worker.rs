//! Simulation worker: one claim-and-execute cycle per tick.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use simbench_core::JobId;

use super::delegate::{DelegateError, EvaluationRequest, ExecutionDelegate};
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between claim attempts
    pub poll_interval: Duration,
    /// Hard limit on a single delegate call
    pub execution_timeout: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            execution_timeout: Duration::from_secs(300),
            name: "simulation-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub ticks: u64,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub claim_errors: u64,
    pub record_errors: u64,
}

/// A single cycle that could not complete.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("claim failed: {0}")]
    Claim(#[source] JobStoreError),
    #[error("could not record outcome of job {job_id}: {source}")]
    Record {
        job_id: JobId,
        #[source]
        source: JobStoreError,
    },
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown, wait for the in-flight job to finish and
    /// return the final statistics.
    pub async fn shutdown(mut self) -> WorkerStats {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "worker task panicked");
            }
        }
        self.stats()
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        lock_stats(&self.stats).clone()
    }
}

fn lock_stats(stats: &Mutex<WorkerStats>) -> MutexGuard<'_, WorkerStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Polls the job store, evaluates claimed jobs and records the outcome.
///
/// Workers hold no global state; any number can run against the same store.
pub struct SimulationWorker<S, D> {
    store: S,
    delegate: D,
    config: WorkerConfig,
}

impl<S, D> SimulationWorker<S, D>
where
    S: JobStore + 'static,
    D: ExecutionDelegate + 'static,
{
    pub fn new(store: S, delegate: D, config: WorkerConfig) -> Self {
        Self {
            store,
            delegate,
            config,
        }
    }

    /// Run one cycle. Returns the job in its terminal state, or `None` when
    /// nothing was pending.
    pub async fn process_next(&self) -> Result<Option<Job>, WorkerError> {
        let Some(job) = self
            .store
            .claim_next_ready()
            .await
            .map_err(WorkerError::Claim)?
        else {
            return Ok(None);
        };

        info!(
            worker = %self.config.name,
            job_id = %job.id,
            service_id = %job.service_id,
            priority = job.priority.get(),
            "claimed simulation job"
        );

        let request = EvaluationRequest::from(&job);
        let outcome = match tokio::time::timeout(
            self.config.execution_timeout,
            self.delegate.evaluate(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DelegateError::Timeout(self.config.execution_timeout)),
        };

        let recorded = match outcome {
            Ok(result) => match self.store.mark_completed(job.id, result).await {
                Err(JobStoreError::Storage(msg)) => {
                    warn!(job_id = %job.id, error = %msg, "failed to store result, marking job failed");
                    self.store
                        .mark_failed(job.id, format!("failed to record result: {msg}"))
                        .await
                }
                other => other,
            },
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "simulation failed");
                self.store.mark_failed(job.id, err.to_string()).await
            }
        };

        let job = recorded.map_err(|source| WorkerError::Record {
            job_id: job.id,
            source,
        })?;
        info!(job_id = %job.id, status = %job.status, "simulation job finished");
        Ok(Some(job))
    }

    /// Start the polling loop on the current tokio runtime.
    ///
    /// Cancellation is observed between ticks; an in-flight job always
    /// reaches a terminal state before the loop exits.
    pub fn spawn(self, shutdown: CancellationToken) -> WorkerHandle {
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let task_stats = stats.clone();
        let token = shutdown.clone();

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(worker = %self.config.name, poll_interval = ?self.config.poll_interval, "worker started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(worker = %self.config.name, "worker received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        let result = self.process_next().await;
                        let mut stats = lock_stats(&task_stats);
                        stats.ticks += 1;
                        match result {
                            Ok(None) => debug!(worker = %self.config.name, "no pending jobs"),
                            Ok(Some(job)) => {
                                stats.jobs_processed += 1;
                                if job.status == JobStatus::Completed {
                                    stats.jobs_succeeded += 1;
                                } else {
                                    stats.jobs_failed += 1;
                                }
                            }
                            Err(err @ WorkerError::Claim(_)) => {
                                stats.claim_errors += 1;
                                error!(worker = %self.config.name, error = %err, "claim failed");
                            }
                            Err(err @ WorkerError::Record { .. }) => {
                                stats.jobs_processed += 1;
                                stats.record_errors += 1;
                                error!(worker = %self.config.name, error = %err, "job left running");
                            }
                        }
                    }
                }
            }

            info!(worker = %self.config.name, "worker stopped");
        });

        WorkerHandle {
            shutdown,
            join: Some(join),
            stats,
        }
    }
}
