//! Durable job queue: insert, claim, complete.
//!
//! ## Design
//!
//! - A job is one logical record, stored either in one table
//!   ([`TableLayout::Unified`]) or split into a read-mostly descriptor table and
//!   a write-hot state table ([`TableLayout::Split`])
//! - Claiming never blocks on a row another claimant holds (skip locked)
//! - Completion either deletes the job or marks it `Completed`, per deployment
//!
//! ## Components
//!
//! - `JobStore`: the store boundary
//! - `PostgresJobStore`: `FOR UPDATE SKIP LOCKED` over sqlx
//! - `InMemoryJobStore`: row-level claim locks, for tests and benchmarks
//! - `JobPoller`: claim / handle / complete loop on a tokio task

pub mod in_memory;
pub mod layout;
pub mod poller;
pub mod postgres;
pub mod store;

pub use in_memory::{InMemoryJobStore, JobStats, RowPresence};
pub use layout::{Statements, TableLayout, TableNames};
pub use poller::{JobHandler, JobPoller, JobPollerConfig, JobPollerHandle, PollOutcome, PollerStats};
pub use postgres::PostgresJobStore;
pub use store::{JobStore, StoreError};
