//! Job record, its lifecycle, and the two halves used by the split layout.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Job execution status.
///
/// Stored as a small integer; the discriminants are the persisted codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum JobStatus {
    /// Waiting for `scheduled_start_at` to pass and a claimant to pick it up
    Scheduled = 1,
    /// Claimed by exactly one claimant
    Processing = 2,
    /// Terminal; retained for history
    Completed = 3,
}

impl JobStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for JobStatus {
    type Error = DomainError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(JobStatus::Scheduled),
            2 => Ok(JobStatus::Processing),
            3 => Ok(JobStatus::Completed),
            other => Err(DomainError::InvalidStatus(other)),
        }
    }
}

/// What "complete" does to a job's rows. Chosen per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Remove the job entirely
    #[default]
    Delete,
    /// Keep the rows with `status = Completed`
    UpdateStatus,
}

impl CompletionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionPolicy::Delete => "delete",
            CompletionPolicy::UpdateStatus => "update_status",
        }
    }
}

impl core::fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(CompletionPolicy::Delete),
            "update_status" | "update-status" | "updatestatus" => {
                Ok(CompletionPolicy::UpdateStatus)
            }
            other => Err(DomainError::validation(format!(
                "unknown completion policy '{other}' (expected delete or update_status)"
            ))),
        }
    }
}

/// Current time truncated to the microsecond precision of SQL timestamps,
/// so records survive a round trip through the database unchanged.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A job record: everything the store knows about one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque work type
    pub job_name: String,
    /// Opaque serialized payload
    pub job_param: Option<String>,
    pub status: JobStatus,
    /// Diagnostic set when a handler fails
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed
    pub scheduled_start_at: DateTime<Utc>,
    /// Incremented once per successful claim
    pub started_count: u32,
    /// Successor link; the store never follows it
    pub next_job_id: Option<JobId>,
}

impl Job {
    /// Create a job that is eligible immediately.
    pub fn new(job_name: impl Into<String>) -> Self {
        let now = now_micros();
        Self {
            id: JobId::new(),
            job_name: job_name.into(),
            job_param: None,
            status: JobStatus::Scheduled,
            error: None,
            created_at: now,
            scheduled_start_at: now,
            started_count: 0,
            next_job_id: None,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Attach an already-serialized payload.
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.job_param = Some(param.into());
        self
    }

    /// Serialize `param` as JSON and attach it as the payload.
    pub fn with_json_param<T: Serialize>(mut self, param: &T) -> DomainResult<Self> {
        let encoded =
            serde_json::to_string(param).map_err(|e| DomainError::payload(e.to_string()))?;
        self.job_param = Some(encoded);
        Ok(self)
    }

    /// Decode the JSON payload, if any.
    pub fn param_json<T: DeserializeOwned>(&self) -> DomainResult<Option<T>> {
        self.job_param
            .as_deref()
            .map(|raw| serde_json::from_str(raw).map_err(|e| DomainError::payload(e.to_string())))
            .transpose()
    }

    /// Schedule the job for a specific instant.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_start_at = at;
        self
    }

    /// Schedule the job with a delay from its creation time.
    ///
    /// Fails when the resulting instant is not representable.
    pub fn delayed(mut self, delay: Duration) -> DomainResult<Self> {
        let scheduled = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| self.created_at.checked_add_signed(delta))
            .ok_or_else(|| {
                DomainError::validation(format!("job {} delay {delay:?} is out of range", self.id))
            })?;
        self.scheduled_start_at = scheduled;
        Ok(self)
    }

    pub fn with_next_job(mut self, next: JobId) -> Self {
        self.next_job_id = Some(next);
        self
    }

    /// Eligible iff still scheduled and the schedule time has passed.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Scheduled && self.scheduled_start_at <= now
    }

    /// Check the producer-side preconditions for inserting a fresh job.
    pub fn validate_new(&self) -> DomainResult<()> {
        if self.status != JobStatus::Scheduled {
            return Err(DomainError::validation(format!(
                "job {} must be inserted as scheduled, got {:?}",
                self.id, self.status
            )));
        }
        if self.started_count != 0 {
            return Err(DomainError::validation(format!(
                "job {} must be inserted with started_count 0, got {}",
                self.id, self.started_count
            )));
        }
        if self.job_name.is_empty() {
            return Err(DomainError::validation(format!(
                "job {} has an empty job_name",
                self.id
            )));
        }
        Ok(())
    }

    /// Separate the read-mostly fields from the write-hot ones.
    pub fn split(self) -> (JobDescriptor, JobState) {
        (
            JobDescriptor {
                id: self.id,
                job_name: self.job_name,
                job_param: self.job_param,
                created_at: self.created_at,
                next_job_id: self.next_job_id,
            },
            JobState {
                id: self.id,
                status: self.status,
                error: self.error,
                scheduled_start_at: self.scheduled_start_at,
                started_count: self.started_count,
            },
        )
    }

    /// Join the two halves back together. Both must describe the same id.
    pub fn from_parts(descriptor: JobDescriptor, state: JobState) -> DomainResult<Self> {
        if descriptor.id != state.id {
            return Err(DomainError::validation(format!(
                "descriptor {} joined with state {}",
                descriptor.id, state.id
            )));
        }
        Ok(Self {
            id: descriptor.id,
            job_name: descriptor.job_name,
            job_param: descriptor.job_param,
            status: state.status,
            error: state.error,
            created_at: descriptor.created_at,
            scheduled_start_at: state.scheduled_start_at,
            started_count: state.started_count,
            next_job_id: descriptor.next_job_id,
        })
    }
}

/// Immutable half of a job (descriptor table in the split layout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: JobId,
    pub job_name: String,
    pub job_param: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_job_id: Option<JobId>,
}

/// Mutable, contended half of a job (state table in the split layout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
    pub scheduled_start_at: DateTime<Utc>,
    pub started_count: u32,
}

impl JobState {
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Scheduled && self.scheduled_start_at <= now
    }

    /// Claim transition: Scheduled -> Processing.
    pub fn mark_processing(&mut self) -> DomainResult<()> {
        self.expect_status(JobStatus::Scheduled)?;
        self.status = JobStatus::Processing;
        self.started_count += 1;
        Ok(())
    }

    /// Processing -> Completed.
    pub fn mark_completed(&mut self) -> DomainResult<()> {
        self.expect_status(JobStatus::Processing)?;
        self.status = JobStatus::Completed;
        Ok(())
    }

    /// Processing -> Completed, recording the handler's error.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.expect_status(JobStatus::Processing)?;
        self.status = JobStatus::Completed;
        self.error = Some(error.into());
        Ok(())
    }

    fn expect_status(&self, expected: JobStatus) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::validation(format!(
                "job {} is {:?}, expected {:?}",
                self.id, self.status, expected
            )));
        }
        Ok(())
    }
}
