//! Postgres-backed job store.
//!
//! Claiming relies on `FOR UPDATE SKIP LOCKED`: a claimant never waits behind a
//! row another claimant has locked, it moves on to the next eligible row. The
//! eligibility check uses the server clock (`NOW()`).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `ConstraintViolation` |
//! | Database (other integrity violation) | `23xxx` | `ConstraintViolation` |
//! | Database (connection exception) | `08xxx` | `Connection` |
//! | Database (other) | Any other | `Fault` |
//! | PoolTimedOut / PoolClosed / Io / Tls | N/A | `Connection` |
//! | ColumnDecode / Decode / other | N/A | `Fault` |
//!
//! ## Thread Safety
//!
//! `PostgresJobStore` is `Send + Sync` and cheap to clone. Every operation
//! borrows a connection from the pool for the duration of one unit of work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, debug, instrument, warn};
use uuid::Uuid;

use jobq_core::{CompletionPolicy, Job, JobId, JobStatus};

use super::layout::{JOB_COLUMNS, Statements, TableLayout, TableNames};
use super::store::{JobStore, StoreError};

/// Postgres job store for one layout.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
    tables: TableNames,
    sql: Arc<Statements>,
}

impl PostgresJobStore {
    /// Create a store over existing tables. See [`PostgresJobStore::ensure_schema`].
    pub fn new(pool: PgPool, layout: TableLayout, tables: TableNames) -> Self {
        let sql = Statements::new(layout, &tables);
        Self {
            pool: Arc::new(pool),
            tables,
            sql: Arc::new(sql),
        }
    }

    pub fn layout(&self) -> TableLayout {
        self.sql.layout
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the layout's tables and ready-index if they do not exist.
    #[instrument(skip(self), fields(layout = %self.layout()), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for ddl in &self.sql.schema {
            sqlx::query(ddl)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn insert_unified(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(&self.sql.insert_primary)
            .bind(job.id.as_uuid())
            .bind(&job.job_name)
            .bind(job.job_param.as_deref())
            .bind(job.status.as_i16())
            .bind(job.error.as_deref())
            .bind(job.created_at)
            .bind(job.scheduled_start_at)
            .bind(started_count_param(job.started_count)?)
            .bind(job.next_job_id.map(Uuid::from))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    /// Descriptor and state rows in one transaction: either both are
    /// committed or neither is visible.
    async fn insert_split(&self, job: &Job, insert_state: &str) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(&self.sql.insert_primary)
            .bind(job.id.as_uuid())
            .bind(&job.job_name)
            .bind(job.job_param.as_deref())
            .bind(job.created_at)
            .bind(job.next_job_id.map(Uuid::from))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_descriptor", e))?;

        sqlx::query(insert_state)
            .bind(job.id.as_uuid())
            .bind(job.status.as_i16())
            .bind(job.error.as_deref())
            .bind(job.scheduled_start_at)
            .bind(started_count_param(job.started_count)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_state", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn delete_unified(&self, job_id: JobId) -> Result<(), StoreError> {
        let result = sqlx::query(&self.sql.delete_guarded)
            .bind(job_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotProcessing(job_id));
        }
        Ok(())
    }

    /// State row first (guarded), then the descriptor, in one transaction.
    /// A guard miss rolls back so nothing is removed.
    async fn delete_split(&self, job_id: JobId, delete_descriptor: &str) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let state = sqlx::query(&self.sql.delete_guarded)
            .bind(job_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_state", e))?;

        if state.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotProcessing(job_id));
        }

        sqlx::query(delete_descriptor)
            .bind(job_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_descriptor", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: JobId) -> Result<(), StoreError> {
        let result = sqlx::query(&self.sql.mark_completed)
            .bind(job_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_completed", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotProcessing(job_id));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(
        skip(self, job),
        fields(job_id = %job.id, job_name = %job.job_name, layout = %self.layout()),
        err
    )]
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        job.validate_new()?;

        match &self.sql.insert_state {
            None => self.insert_unified(&job).await,
            Some(insert_state) => self.insert_split(&job, insert_state).await,
        }
    }

    #[instrument(skip(self), fields(layout = %self.layout(), job_id = tracing::field::Empty), err)]
    async fn claim(&self) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&self.sql.claim)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = job_from_row(&row)?;

        Span::current().record("job_id", tracing::field::display(job.id));
        debug!(started_count = job.started_count, "claimed job");
        Ok(Some(job))
    }

    #[instrument(skip(self), fields(job_id = %job_id, layout = %self.layout()), err)]
    async fn complete(&self, job_id: JobId, policy: CompletionPolicy) -> Result<(), StoreError> {
        let result = match (policy, &self.sql.delete_descriptor) {
            (CompletionPolicy::UpdateStatus, _) => self.mark_completed(job_id).await,
            (CompletionPolicy::Delete, None) => self.delete_unified(job_id).await,
            (CompletionPolicy::Delete, Some(delete_descriptor)) => {
                self.delete_split(job_id, delete_descriptor).await
            }
        };

        if let Err(StoreError::NotProcessing(_)) = &result {
            warn!(policy = %policy, "complete called on a job that is not processing");
        }
        result
    }

    #[instrument(skip(self, error), fields(job_id = %job_id, layout = %self.layout()), err)]
    async fn fail(&self, job_id: JobId, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(&self.sql.mark_failed)
            .bind(job_id.as_uuid())
            .bind(error)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_failed", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotProcessing(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id, layout = %self.layout()), err)]
    async fn fetch(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&self.sql.fetch)
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;

        row.as_ref().map(job_from_row).transpose()
    }
}

fn started_count_param(started_count: u32) -> Result<i32, StoreError> {
    i32::try_from(started_count)
        .map_err(|_| StoreError::InvalidJob(format!("started_count {started_count} out of range")))
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    job_name: String,
    job_param: Option<String>,
    status: i16,
    error: Option<String>,
    created_at: DateTime<Utc>,
    scheduled_start_at: DateTime<Utc>,
    started_count: i32,
    next_job_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let [id, job_name, job_param, status, error, created_at, scheduled_start_at, started_count, next_job_id] =
            JOB_COLUMNS;
        Ok(JobRow {
            id: row.try_get(id)?,
            job_name: row.try_get(job_name)?,
            job_param: row.try_get(job_param)?,
            status: row.try_get(status)?,
            error: row.try_get(error)?,
            created_at: row.try_get(created_at)?,
            scheduled_start_at: row.try_get(scheduled_start_at)?,
            started_count: row.try_get(started_count)?,
            next_job_id: row.try_get(next_job_id)?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let started_count = u32::try_from(row.started_count).map_err(|_| {
            StoreError::Fault(format!(
                "job {} has negative started_count {}",
                row.id, row.started_count
            ))
        })?;

        Ok(Job {
            id: JobId::from_uuid(row.id),
            job_name: row.job_name,
            job_param: row.job_param,
            status: JobStatus::try_from(row.status)?,
            error: row.error,
            created_at: row.created_at,
            scheduled_start_at: row.scheduled_start_at,
            started_count,
            next_job_id: row.next_job_id.map(JobId::from_uuid),
        })
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let job_row = JobRow::from_row(row)
        .map_err(|e| StoreError::Fault(format!("failed to deserialize job row: {}", e)))?;
    Job::try_from(job_row)
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                // Class 23: integrity constraint violation (23505 = unique)
                Some(code) if code.starts_with("23") => StoreError::ConstraintViolation(msg),
                // Class 08: connection exception
                Some(code) if code.starts_with("08") => StoreError::Connection(msg),
                _ => StoreError::Fault(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Connection(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Connection(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Connection(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => StoreError::Connection(format!("tls error in {}: {}", operation, e)),
        _ => StoreError::Fault(format!("sqlx error in {}: {}", operation, err)),
    }
}
