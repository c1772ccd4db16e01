//! Simulation job queue.
//!
//! ## Components
//!
//! - `Job`: the queued work item and its status machine
//! - `JobStore`: persistence and the atomic claim (in-memory or Postgres)
//! - `ExecutionDelegate`: the remote evaluator called once per job
//! - `SimulationWorker`: polls, claims, evaluates, records

pub mod delegate;
pub mod postgres;
pub mod store;
pub mod types;
pub mod worker;

pub use delegate::{DelegateError, EvaluationRequest, ExecutionDelegate, HttpExecutionDelegate};
pub use postgres::PostgresJobStore;
pub use store::{
    InMemoryJobStore, JobFilter, JobPage, JobStore, JobStoreError, Pagination, QueueStats,
};
pub use types::{Job, JobSpec, JobStatus, NewJob, Priority, TransitionError};
pub use worker::{SimulationWorker, WorkerConfig, WorkerError, WorkerHandle, WorkerStats};
