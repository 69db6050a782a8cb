//! `jobq-core` — the job record and its lifecycle.
//!
//! This crate contains **pure domain** types (no storage concerns).

pub mod error;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{CompletionPolicy, Job, JobDescriptor, JobState, JobStatus, now_micros};
