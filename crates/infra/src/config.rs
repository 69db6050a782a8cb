//! Configuration loading from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required for [`StoreConfig::connect`] |
//! | `JOBQ_LAYOUT` | `split` |
//! | `JOBQ_COMPLETION` | `delete` |
//! | `JOBQ_TABLE_PREFIX` | empty |
//! | `JOBQ_MAX_CONNECTIONS` | `10` |
//! | `JOBQ_ACQUIRE_TIMEOUT_MS` | `5000` |
//! | `JOBQ_POLL_INTERVAL_MS` | `500` |
//! | `JOBQ_WORKERS` | `4` |

use std::str::FromStr;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use jobq_core::CompletionPolicy;

use crate::jobs::{PostgresJobStore, StoreError, TableLayout, TableNames};

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("failed to connect to Postgres: {0}")]
    Connect(#[from] StoreError),
}

/// Job store deployment configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub layout: TableLayout,
    pub completion: CompletionPolicy,
    pub tables: TableNames,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub poll_interval: Duration,
    pub workers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            layout: TableLayout::Split,
            completion: CompletionPolicy::Delete,
            tables: TableNames::default(),
            max_connections: 10,
            acquire_timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(500),
            workers: 4,
        }
    }
}

impl StoreConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source. Unset and empty are the same.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let tables = match get("JOBQ_TABLE_PREFIX") {
            Some(prefix) => TableNames::with_prefix(prefix.trim()).map_err(|e| ConfigError::Invalid {
                var: "JOBQ_TABLE_PREFIX",
                message: e.to_string(),
            })?,
            None => defaults.tables,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            layout: parse_or(get("JOBQ_LAYOUT"), "JOBQ_LAYOUT", defaults.layout)?,
            completion: parse_or(get("JOBQ_COMPLETION"), "JOBQ_COMPLETION", defaults.completion)?,
            tables,
            max_connections: parse_or(
                get("JOBQ_MAX_CONNECTIONS"),
                "JOBQ_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            acquire_timeout: millis_or(
                get("JOBQ_ACQUIRE_TIMEOUT_MS"),
                "JOBQ_ACQUIRE_TIMEOUT_MS",
                defaults.acquire_timeout,
            )?,
            poll_interval: millis_or(
                get("JOBQ_POLL_INTERVAL_MS"),
                "JOBQ_POLL_INTERVAL_MS",
                defaults.poll_interval,
            )?,
            workers: parse_or(get("JOBQ_WORKERS"), "JOBQ_WORKERS", defaults.workers)?,
        })
    }

    /// Build the connection pool.
    pub async fn connect(&self) -> Result<PgPool, ConfigError> {
        let url = self
            .database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| crate::jobs::postgres::map_sqlx_error("connect", e))?;

        info!(
            layout = %self.layout,
            completion = %self.completion,
            max_connections = self.max_connections,
            "connected to Postgres"
        );
        Ok(pool)
    }

    /// Connect and build a Postgres job store for this configuration.
    pub async fn postgres_store(&self) -> Result<PostgresJobStore, ConfigError> {
        let pool = self.connect().await?;
        Ok(PostgresJobStore::new(pool, self.layout, self.tables.clone()))
    }
}

fn parse_or<T>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn millis_or(raw: Option<String>, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(raw, var, fallback).map(Duration::from_millis)
}
