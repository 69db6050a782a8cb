//! Infrastructure layer: job stores, poller, configuration.

pub mod config;
pub mod jobs;

pub use config::{ConfigError, StoreConfig};
pub use jobs::{
    InMemoryJobStore, JobPoller, JobPollerConfig, JobStore, PostgresJobStore, StoreError,
    TableLayout, TableNames,
};
