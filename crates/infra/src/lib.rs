//! Infrastructure layer: job queue persistence, the worker, sessions, config.

pub mod config;
pub mod jobs;
pub mod sessions;
