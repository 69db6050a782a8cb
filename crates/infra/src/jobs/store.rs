//! Job store boundary: insert, claim, complete.

use std::sync::Arc;

use jobq_core::{CompletionPolicy, DomainError, Job, JobId};

/// Job store abstraction.
///
/// Implementations hold no state of their own between calls; everything lives
/// in the backing store, which is the only arbiter of consistency.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a fresh, scheduled job. In the split layout both rows are
    /// written as one atomic unit.
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Claim the earliest-scheduled eligible job that no other claimant holds.
    ///
    /// Returns `None` when nothing is eligible; that is the normal idle outcome.
    async fn claim(&self) -> Result<Option<Job>, StoreError>;

    /// Finish a processing job according to `policy`.
    async fn complete(&self, job_id: JobId, policy: CompletionPolicy) -> Result<(), StoreError>;

    /// Finish a processing job as failed, recording `error`. The rows are kept
    /// whatever the deployment's completion policy is.
    async fn fail(&self, job_id: JobId, error: &str) -> Result<(), StoreError>;

    /// Read a job without locking it.
    async fn fetch(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Pool exhausted, closed, or the network failed. Retryable.
    #[error("connection error: {0}")]
    Connection(String),
    /// Duplicate id or other integrity violation. A producer bug.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// The job was not in `Processing` when it was completed or failed.
    #[error("job {0} is not processing")]
    NotProcessing(JobId),
    /// The job failed the insert preconditions.
    #[error("invalid job: {0}")]
    InvalidJob(String),
    /// Any other backing-store error.
    #[error("store fault: {0}")]
    Fault(String),
}

impl StoreError {
    /// Whether the caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => StoreError::InvalidJob(msg),
            other => StoreError::Fault(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        (**self).insert(job).await
    }

    async fn claim(&self) -> Result<Option<Job>, StoreError> {
        (**self).claim().await
    }

    async fn complete(&self, job_id: JobId, policy: CompletionPolicy) -> Result<(), StoreError> {
        (**self).complete(job_id, policy).await
    }

    async fn fail(&self, job_id: JobId, error: &str) -> Result<(), StoreError> {
        (**self).fail(job_id, error).await
    }

    async fn fetch(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).fetch(job_id).await
    }
}
