//! In-process job store.
//!
//! Mirrors both physical layouts with maps, and implements skip-locked claiming
//! at the application level. Every state row carries a row lock that only
//! claimants take: a claimant scans eligible rows in schedule order, tries the
//! row lock of each candidate, skips rows another claimant holds, and re-checks
//! eligibility under the lock before transitioning (compare-and-swap).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use jobq_core::{CompletionPolicy, DomainResult, Job, JobDescriptor, JobId, JobState, JobStatus};

use super::layout::TableLayout;
use super::store::{JobStore, StoreError};

/// The contended half of a job plus its row lock.
#[derive(Debug)]
struct StateRow {
    /// Held by a claimant between picking the row and updating it.
    claim_lock: AtomicBool,
    state: Mutex<JobState>,
}

impl StateRow {
    fn new(state: JobState) -> Self {
        Self {
            claim_lock: AtomicBool::new(false),
            state: Mutex::new(state),
        }
    }

    /// Non-blocking `FOR UPDATE`: `None` when another claimant holds the row.
    fn try_lock_for_update(&self) -> Option<RowLock<'_>> {
        self.claim_lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RowLock(&self.claim_lock))
    }

    fn is_locked(&self) -> bool {
        self.claim_lock.load(Ordering::Acquire)
    }

    fn state(&self) -> Result<MutexGuard<'_, JobState>, StoreError> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// `None` when someone else is touching the row right now.
    fn try_state(&self) -> Result<Option<MutexGuard<'_, JobState>>, StoreError> {
        match self.state.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(poisoned()),
        }
    }
}

/// Releases a row lock on drop.
struct RowLock<'a>(&'a AtomicBool);

impl Drop for RowLock<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One row of the unified layout. The descriptor never changes after insert.
#[derive(Debug)]
struct UnifiedRow {
    descriptor: JobDescriptor,
    state: StateRow,
}

#[derive(Debug)]
enum Tables {
    Unified {
        jobs: RwLock<HashMap<JobId, UnifiedRow>>,
    },
    Split {
        descriptors: RwLock<HashMap<JobId, JobDescriptor>>,
        states: RwLock<HashMap<JobId, StateRow>>,
    },
}

/// Counts of jobs by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub scheduled: usize,
    pub processing: usize,
    pub completed: usize,
}

/// Which physical rows exist for a job id.
///
/// In the unified layout both flags describe the same single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPresence {
    pub descriptor: bool,
    pub state: bool,
}

impl RowPresence {
    pub fn absent(self) -> bool {
        !self.descriptor && !self.state
    }
}

/// In-memory job store for tests, benches and single-process use.
///
/// Lock order is always descriptors before states.
#[derive(Debug)]
pub struct InMemoryJobStore {
    layout: TableLayout,
    tables: Tables,
}

impl InMemoryJobStore {
    pub fn new(layout: TableLayout) -> Self {
        let tables = match layout {
            TableLayout::Unified => Tables::Unified {
                jobs: RwLock::new(HashMap::new()),
            },
            TableLayout::Split => Tables::Split {
                descriptors: RwLock::new(HashMap::new()),
                states: RwLock::new(HashMap::new()),
            },
        };
        Self { layout, tables }
    }

    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    /// Claim against a caller-supplied clock.
    pub fn claim_at(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        match &self.tables {
            Tables::Unified { jobs } => {
                let jobs = read(jobs)?;
                let claimed = claim_from(jobs.iter().map(|(id, row)| (*id, &row.state)), now)?;
                let Some(state) = claimed else {
                    return Ok(None);
                };
                let row = jobs.get(&state.id).ok_or_else(|| missing(state.id))?;
                Ok(Some(Job::from_parts(row.descriptor.clone(), state)?))
            }
            Tables::Split {
                descriptors,
                states,
            } => {
                // The state table is released before the descriptor is read.
                let claimed = {
                    let states = read(states)?;
                    claim_from(states.iter().map(|(id, row)| (*id, row)), now)?
                };
                let Some(state) = claimed else {
                    return Ok(None);
                };
                let descriptor = read(descriptors)?
                    .get(&state.id)
                    .cloned()
                    .ok_or_else(|| missing(state.id))?;
                Ok(Some(Job::from_parts(descriptor, state)?))
            }
        }
    }

    /// Which rows currently exist for `job_id`.
    pub fn row_presence(&self, job_id: JobId) -> Result<RowPresence, StoreError> {
        match &self.tables {
            Tables::Unified { jobs } => {
                let present = read(jobs)?.contains_key(&job_id);
                Ok(RowPresence {
                    descriptor: present,
                    state: present,
                })
            }
            Tables::Split {
                descriptors,
                states,
            } => {
                let descriptors = read(descriptors)?;
                let states = read(states)?;
                Ok(RowPresence {
                    descriptor: descriptors.contains_key(&job_id),
                    state: states.contains_key(&job_id),
                })
            }
        }
    }

    /// Job counts by status.
    pub fn stats(&self) -> Result<JobStats, StoreError> {
        let mut stats = JobStats::default();
        let mut tally = |row: &StateRow| -> Result<(), StoreError> {
            match row.state()?.status {
                JobStatus::Scheduled => stats.scheduled += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
            }
            Ok(())
        };

        match &self.tables {
            Tables::Unified { jobs } => {
                for row in read(jobs)?.values() {
                    tally(&row.state)?;
                }
            }
            Tables::Split { states, .. } => {
                for row in read(states)?.values() {
                    tally(row)?;
                }
            }
        }
        Ok(stats)
    }

    /// Apply a transition out of Processing to the contended row only.
    fn transition(
        &self,
        job_id: JobId,
        apply: impl FnOnce(&mut JobState) -> DomainResult<()>,
    ) -> Result<(), StoreError> {
        let guarded = |row: Option<&StateRow>| -> Result<(), StoreError> {
            let Some(row) = row else {
                return Err(StoreError::NotProcessing(job_id));
            };
            let mut state = row.state()?;
            apply(&mut *state).map_err(|_| StoreError::NotProcessing(job_id))
        };

        match &self.tables {
            Tables::Unified { jobs } => {
                let jobs = read(jobs)?;
                guarded(jobs.get(&job_id).map(|row| &row.state))
            }
            Tables::Split { states, .. } => {
                let states = read(states)?;
                guarded(states.get(&job_id))
            }
        }
    }

    fn delete_processing(&self, job_id: JobId) -> Result<(), StoreError> {
        match &self.tables {
            Tables::Unified { jobs } => {
                let mut jobs = write(jobs)?;
                let processing = match jobs.get(&job_id) {
                    Some(row) => row.state.state()?.status == JobStatus::Processing,
                    None => false,
                };
                if !processing {
                    return Err(StoreError::NotProcessing(job_id));
                }
                jobs.remove(&job_id);
                Ok(())
            }
            Tables::Split {
                descriptors,
                states,
            } => {
                // Both write locks are held so no reader sees half a job.
                let mut descriptors = write(descriptors)?;
                let mut states = write(states)?;
                let processing = match states.get(&job_id) {
                    Some(row) => row.state()?.status == JobStatus::Processing,
                    None => false,
                };
                if !processing {
                    return Err(StoreError::NotProcessing(job_id));
                }
                states.remove(&job_id);
                descriptors.remove(&job_id);
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        job.validate_new()?;
        let job_id = job.id;
        let (descriptor, state) = job.split();

        match &self.tables {
            Tables::Unified { jobs } => {
                let mut jobs = write(jobs)?;
                if jobs.contains_key(&job_id) {
                    return Err(duplicate(job_id));
                }
                jobs.insert(
                    job_id,
                    UnifiedRow {
                        descriptor,
                        state: StateRow::new(state),
                    },
                );
            }
            Tables::Split {
                descriptors,
                states,
            } => {
                let mut descriptors = write(descriptors)?;
                let mut states = write(states)?;
                if descriptors.contains_key(&job_id) || states.contains_key(&job_id) {
                    return Err(duplicate(job_id));
                }
                descriptors.insert(job_id, descriptor);
                states.insert(job_id, StateRow::new(state));
            }
        }
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Job>, StoreError> {
        self.claim_at(Utc::now())
    }

    async fn complete(&self, job_id: JobId, policy: CompletionPolicy) -> Result<(), StoreError> {
        let result = match policy {
            CompletionPolicy::Delete => self.delete_processing(job_id),
            CompletionPolicy::UpdateStatus => self.transition(job_id, JobState::mark_completed),
        };
        if let Err(StoreError::NotProcessing(_)) = &result {
            warn!(job_id = %job_id, policy = %policy, "complete called on a job that is not processing");
        }
        result
    }

    async fn fail(&self, job_id: JobId, error: &str) -> Result<(), StoreError> {
        self.transition(job_id, |state| state.mark_failed(error))
    }

    async fn fetch(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        match &self.tables {
            Tables::Unified { jobs } => {
                let jobs = read(jobs)?;
                let Some(row) = jobs.get(&job_id) else {
                    return Ok(None);
                };
                let state = row.state.state()?.clone();
                Ok(Some(Job::from_parts(row.descriptor.clone(), state)?))
            }
            Tables::Split {
                descriptors,
                states,
            } => {
                let descriptors = read(descriptors)?;
                let states = read(states)?;
                match (descriptors.get(&job_id), states.get(&job_id)) {
                    (Some(descriptor), Some(row)) => {
                        let state = row.state()?.clone();
                        Ok(Some(Job::from_parts(descriptor.clone(), state)?))
                    }
                    _ => Ok(None),
                }
            }
        }
    }
}

/// Skip-locked claim over a set of state rows.
///
/// Eligible, unlocked rows are snapshotted and ordered by
/// `scheduled_start_at`; each candidate's row lock is then tried. A row that
/// is locked, or no longer eligible once locked, is a lost race and the next
/// candidate is tried.
fn claim_from<'a>(
    rows: impl Iterator<Item = (JobId, &'a StateRow)>,
    now: DateTime<Utc>,
) -> Result<Option<JobState>, StoreError> {
    let mut candidates = Vec::new();
    for (job_id, row) in rows {
        if row.is_locked() {
            continue;
        }
        let Some(state) = row.try_state()? else {
            continue;
        };
        if state.is_eligible_at(now) {
            candidates.push((state.scheduled_start_at, job_id, row));
        }
    }
    candidates.sort_by_key(|(scheduled_start_at, job_id, _)| (*scheduled_start_at, *job_id));

    for (_, job_id, row) in candidates {
        let Some(_row_lock) = row.try_lock_for_update() else {
            debug!(job_id = %job_id, "candidate locked by another claimant; skipping");
            continue;
        };
        let mut state = row.state()?;
        if !state.is_eligible_at(now) {
            continue;
        }
        state.mark_processing()?;
        debug!(job_id = %job_id, started_count = state.started_count, "claimed job");
        return Ok(Some(state.clone()));
    }
    Ok(None)
}

fn read<T>(table: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    table.read().map_err(|_| poisoned())
}

fn write<T>(table: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    table.write().map_err(|_| poisoned())
}

fn poisoned() -> StoreError {
    StoreError::Fault("in-memory table lock poisoned".to_string())
}

fn duplicate(job_id: JobId) -> StoreError {
    StoreError::ConstraintViolation(format!("job {job_id} already exists"))
}

fn missing(job_id: JobId) -> StoreError {
    StoreError::Fault(format!("descriptor row missing for claimed job {job_id}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    const LAYOUTS: [TableLayout; 2] = [TableLayout::Unified, TableLayout::Split];

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[tokio::test]
    async fn insert_then_claim_returns_the_job() {
        for layout in LAYOUTS {
            let store = InMemoryJobStore::new(layout);
            let job = Job::new("send_report").with_param(r#"{"copies":2}"#);
            store.insert(job.clone()).await.unwrap();

            let claimed = store.claim().await.unwrap().unwrap();
            assert_eq!(claimed.id, job.id);
            assert_eq!(claimed.job_name, "send_report");
            assert_eq!(claimed.job_param, job.job_param);
            assert_eq!(claimed.status, JobStatus::Processing);
            assert_eq!(claimed.started_count, 1);

            assert!(store.claim().await.unwrap().is_none(), "{layout}");
        }
    }

    #[tokio::test]
    async fn future_jobs_are_not_claimable() {
        for layout in LAYOUTS {
            let store = InMemoryJobStore::new(layout);
            let job = Job::new("later").delayed(Duration::from_secs(10)).unwrap();
            store.insert(job.clone()).await.unwrap();

            assert!(store.claim_at(job.created_at).unwrap().is_none());
            let claimed = store.claim_at(job.created_at + secs(10)).unwrap().unwrap();
            assert_eq!(claimed.id, job.id);
        }
    }

    #[tokio::test]
    async fn claims_earliest_scheduled_first() {
        for layout in LAYOUTS {
            let store = InMemoryJobStore::new(layout);
            let now = Utc::now();
            let recent = Job::new("recent").scheduled_at(now - secs(1));
            let oldest = Job::new("oldest").scheduled_at(now - secs(3));
            let future = Job::new("future").scheduled_at(now + secs(10));
            for job in [recent.clone(), oldest.clone(), future] {
                store.insert(job).await.unwrap();
            }

            assert_eq!(store.claim_at(now).unwrap().unwrap().id, oldest.id);
            assert_eq!(store.claim_at(now).unwrap().unwrap().id, recent.id);
            assert!(store.claim_at(now).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn claim_skips_rows_locked_by_another_claimant() {
        let store = InMemoryJobStore::new(TableLayout::Split);
        let now = Utc::now();
        let first = Job::new("first").scheduled_at(now - secs(2));
        let second = Job::new("second").scheduled_at(now - secs(1));
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        let Tables::Split { states, .. } = &store.tables else {
            unreachable!()
        };
        let states = states.read().unwrap();
        let held = states[&first.id].try_lock_for_update().unwrap();

        // The earlier job is held, so the claimant moves on instead of waiting.
        let claimed = claim_from(states.iter().map(|(id, row)| (*id, row)), now)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(claim_from(states.iter().map(|(id, row)| (*id, row)), now)
            .unwrap()
            .is_none());

        drop(held);
        let claimed = claim_from(states.iter().map(|(id, row)| (*id, row)), now)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn scan_skips_rows_whose_state_is_busy() {
        let store = InMemoryJobStore::new(TableLayout::Unified);
        let now = Utc::now();
        let first = Job::new("first").scheduled_at(now - secs(2));
        let second = Job::new("second").scheduled_at(now - secs(1));
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        let Tables::Unified { jobs } = &store.tables else {
            unreachable!()
        };
        let jobs = jobs.read().unwrap();
        let rows = || jobs.iter().map(|(id, row)| (*id, &row.state));

        // Only the state mutex is held, not the claim lock.
        let busy = jobs[&first.id].state.state().unwrap();
        let claimed = claim_from(rows(), now).unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(claim_from(rows(), now).unwrap().is_none());
        assert_eq!(busy.status, JobStatus::Scheduled);

        drop(busy);
        let claimed = claim_from(rows(), now).unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_claims_never_share_a_job() {
        for layout in LAYOUTS {
            let store = Arc::new(InMemoryJobStore::new(layout));
            let eligible = 20;
            let claimants = 64;
            for i in 0..eligible {
                store
                    .insert(Job::new(format!("job-{i}")))
                    .await
                    .unwrap();
            }

            let mut handles = Vec::new();
            for _ in 0..claimants {
                let store = store.clone();
                handles.push(tokio::spawn(async move { store.claim().await }));
            }

            let mut claimed = Vec::new();
            let mut empty = 0;
            for handle in handles {
                match handle.await.unwrap().unwrap() {
                    Some(job) => claimed.push(job.id),
                    None => empty += 1,
                }
            }

            let distinct: HashSet<_> = claimed.iter().copied().collect();
            assert_eq!(claimed.len(), eligible, "{layout}");
            assert_eq!(distinct.len(), eligible, "{layout}");
            assert_eq!(empty, claimants - eligible, "{layout}");
        }
    }

    #[tokio::test]
    async fn delete_removes_every_row() {
        for layout in LAYOUTS {
            let store = InMemoryJobStore::new(layout);
            let job = Job::new("a");
            store.insert(job.clone()).await.unwrap();
            store.claim().await.unwrap().unwrap();

            store.complete(job.id, CompletionPolicy::Delete).await.unwrap();

            assert!(store.row_presence(job.id).unwrap().absent(), "{layout}");
            assert!(store.fetch(job.id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn update_status_keeps_the_row() {
        for layout in LAYOUTS {
            let store = InMemoryJobStore::new(layout);
            let job = Job::new("a");
            store.insert(job.clone()).await.unwrap();
            store.claim().await.unwrap().unwrap();

            store
                .complete(job.id, CompletionPolicy::UpdateStatus)
                .await
                .unwrap();

            let stored = store.fetch(job.id).await.unwrap().unwrap();
            assert_eq!(stored.status, JobStatus::Completed);
            assert_eq!(stored.started_count, 1);
            assert!(store.claim().await.unwrap().is_none());
            let presence = store.row_presence(job.id).unwrap();
            assert!(presence.descriptor && presence.state);
        }
    }

    #[tokio::test]
    async fn completing_a_job_that_is_not_processing_changes_nothing() {
        for layout in LAYOUTS {
            for policy in [CompletionPolicy::Delete, CompletionPolicy::UpdateStatus] {
                let store = InMemoryJobStore::new(layout);
                let job = Job::new("a");
                store.insert(job.clone()).await.unwrap();

                let err = store.complete(job.id, policy).await.unwrap_err();
                assert_eq!(err, StoreError::NotProcessing(job.id));
                assert_eq!(
                    store.fetch(job.id).await.unwrap().unwrap().status,
                    JobStatus::Scheduled
                );

                let unknown = JobId::new();
                assert_eq!(
                    store.complete(unknown, policy).await.unwrap_err(),
                    StoreError::NotProcessing(unknown)
                );
            }
        }
    }

    #[tokio::test]
    async fn second_completion_is_rejected() {
        for layout in LAYOUTS {
            for policy in [CompletionPolicy::Delete, CompletionPolicy::UpdateStatus] {
                let store = InMemoryJobStore::new(layout);
                let job = Job::new("a");
                store.insert(job.clone()).await.unwrap();
                store.claim().await.unwrap().unwrap();

                store.complete(job.id, policy).await.unwrap();
                assert_eq!(
                    store.complete(job.id, policy).await.unwrap_err(),
                    StoreError::NotProcessing(job.id)
                );
            }
        }
    }

    #[tokio::test]
    async fn fail_records_error_and_keeps_row() {
        for layout in LAYOUTS {
            let store = InMemoryJobStore::new(layout);
            let job = Job::new("a");
            store.insert(job.clone()).await.unwrap();
            store.claim().await.unwrap().unwrap();

            store.fail(job.id, "handler exploded").await.unwrap();

            let stored = store.fetch(job.id).await.unwrap().unwrap();
            assert_eq!(stored.status, JobStatus::Completed);
            assert_eq!(stored.error.as_deref(), Some("handler exploded"));
            assert_eq!(
                store.fail(job.id, "again").await.unwrap_err(),
                StoreError::NotProcessing(job.id)
            );
        }
    }

    #[tokio::test]
    async fn duplicate_ids_are_constraint_violations() {
        for layout in LAYOUTS {
            let store = InMemoryJobStore::new(layout);
            let job = Job::new("a");
            store.insert(job.clone()).await.unwrap();

            let err = store.insert(job.clone()).await.unwrap_err();
            assert!(matches!(err, StoreError::ConstraintViolation(_)));
            assert_eq!(store.stats().unwrap().scheduled, 1);
        }
    }

    #[tokio::test]
    async fn split_insert_conflicting_on_state_writes_nothing() {
        let store = InMemoryJobStore::new(TableLayout::Split);
        let job = Job::new("orphaned");
        let (_, stray_state) = job.clone().split();
        {
            let Tables::Split { states, .. } = &store.tables else {
                unreachable!()
            };
            states
                .write()
                .unwrap()
                .insert(job.id, StateRow::new(stray_state));
        }

        let err = store.insert(job.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(
            store.row_presence(job.id).unwrap(),
            RowPresence {
                descriptor: false,
                state: true
            }
        );
    }

    #[tokio::test]
    async fn insert_rejects_jobs_that_already_ran() {
        let store = InMemoryJobStore::new(TableLayout::Split);
        let mut job = Job::new("a");
        job.started_count = 1;

        let err = store.insert(job.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidJob(_)));
        assert!(store.row_presence(job.id).unwrap().absent());
    }

    #[tokio::test]
    async fn stats_follow_the_lifecycle() {
        let store = InMemoryJobStore::new(TableLayout::Unified);
        for i in 0..4 {
            store.insert(Job::new(format!("job-{i}"))).await.unwrap();
        }
        let a = store.claim().await.unwrap().unwrap();
        let b = store.claim().await.unwrap().unwrap();
        store
            .complete(a.id, CompletionPolicy::UpdateStatus)
            .await
            .unwrap();
        store.complete(b.id, CompletionPolicy::Delete).await.unwrap();

        assert_eq!(
            store.stats().unwrap(),
            JobStats {
                scheduled: 2,
                processing: 0,
                completed: 1,
            }
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: sequential claims return exactly the eligible jobs, in
        /// ascending schedule order, and nothing else.
        #[test]
        fn sequential_claims_follow_schedule_order(
            offsets in prop::collection::vec(-600i64..600i64, 0..24),
            split in any::<bool>(),
        ) {
            let layout = if split { TableLayout::Split } else { TableLayout::Unified };
            let store = InMemoryJobStore::new(layout);
            let now = Utc::now();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

            let mut expected = Vec::new();
            for (i, offset) in offsets.iter().enumerate() {
                let job = Job::new(format!("job-{i}")).scheduled_at(now + secs(*offset));
                if *offset <= 0 {
                    expected.push((job.scheduled_start_at, job.id));
                }
                runtime.block_on(store.insert(job)).unwrap();
            }
            expected.sort();

            let mut claimed = Vec::new();
            while let Some(job) = store.claim_at(now).unwrap() {
                prop_assert_eq!(job.started_count, 1);
                claimed.push((job.scheduled_start_at, job.id));
            }
            prop_assert_eq!(claimed, expected);
        }
    }
}
