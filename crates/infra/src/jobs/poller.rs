//! Job poller: claims jobs, runs handlers, completes or fails them.
//!
//! The store never retries; this loop is where "no job available" turns into
//! a sleep and a store error turns into a logged retry on the next tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobq_core::{CompletionPolicy, Job, JobId};

use super::store::{JobStore, StoreError};

/// Job handler function type. `Err` carries the diagnostic stored on the job.
pub type JobHandler = Box<dyn Fn(&Job) -> Result<(), String> + Send + Sync>;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct JobPollerConfig {
    /// How long to sleep when no job is eligible
    pub poll_interval: Duration,
    /// What happens to a job after its handler succeeds
    pub completion: CompletionPolicy,
    /// Name for logging
    pub name: String,
}

impl Default for JobPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            completion: CompletionPolicy::Delete,
            name: "job-poller".to_string(),
        }
    }
}

impl JobPollerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was eligible
    Idle,
    /// Handler succeeded and the job was completed
    Completed(JobId),
    /// Handler failed (or none matched) and the job was failed
    Failed(JobId),
    /// The job was claimed but could not be completed or failed afterwards;
    /// it stays `Processing`
    Stranded { job_id: JobId, error: StoreError },
}

/// Poller runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PollerStats {
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub idle_polls: u64,
    pub store_errors: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running poller.
#[derive(Debug)]
pub struct JobPollerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<PollerStats>>,
}

impl JobPollerHandle {
    /// Request graceful shutdown and wait for the in-flight job to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "job poller task ended abnormally");
            }
        }
    }

    /// Get current poller statistics.
    pub fn stats(&self) -> PollerStats {
        lock_stats(&self.stats).clone()
    }
}

/// Polls a job store and dispatches claimed jobs to handlers by `job_name`.
pub struct JobPoller<S: JobStore> {
    store: S,
    handlers: HashMap<String, JobHandler>,
}

impl<S: JobStore + 'static> JobPoller<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job name.
    ///
    /// `"report.*"` matches every name starting with `report.`; `"*"` matches
    /// anything. Exact names win over categories, categories over the wildcard.
    pub fn register_handler<F>(&mut self, name_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> Result<(), String> + Send + Sync + 'static,
    {
        self.handlers.insert(name_pattern.into(), Box::new(handler));
    }

    fn get_handler(&self, job_name: &str) -> Option<&JobHandler> {
        if let Some(h) = self.handlers.get(job_name) {
            return Some(h);
        }

        // Longest matching category wins.
        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = job_name.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler);
        if category.is_some() {
            return category;
        }

        self.handlers.get("*")
    }

    /// Claim at most one job and drive it to a terminal state.
    pub async fn run_once(&self, completion: CompletionPolicy) -> Result<PollOutcome, StoreError> {
        let Some(job) = self.store.claim().await? else {
            return Ok(PollOutcome::Idle);
        };
        debug!(job_id = %job.id, job_name = %job.job_name, started_count = job.started_count, "claimed job");

        let outcome = match self.get_handler(&job.job_name) {
            Some(handler) => handler(&job),
            None => Err(format!("no handler for job name: {}", job.job_name)),
        };

        let (finished, handler_ok) = match outcome {
            Ok(()) => (self.store.complete(job.id, completion).await, true),
            Err(error) => {
                warn!(job_id = %job.id, job_name = %job.job_name, error = %error, "job failed");
                (self.store.fail(job.id, &error).await, false)
            }
        };

        match (finished, handler_ok) {
            (Ok(()), true) => {
                debug!(job_id = %job.id, policy = %completion, "job completed");
                Ok(PollOutcome::Completed(job.id))
            }
            (Ok(()), false) => Ok(PollOutcome::Failed(job.id)),
            (Err(error), handler_ok) => {
                error!(
                    job_id = %job.id,
                    job_name = %job.job_name,
                    handler_ok,
                    error = %error,
                    "handler finished but the job could not be finalized; it stays processing"
                );
                Ok(PollOutcome::Stranded { job_id: job.id, error })
            }
        }
    }

    /// Run the poll loop as a tokio task.
    pub fn spawn(self, config: JobPollerConfig) -> JobPollerHandle
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(PollerStats::default()));
        let join = tokio::spawn(poll_loop(self, config, shutdown_rx, stats.clone()));

        JobPollerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

async fn poll_loop<S: JobStore + 'static>(
    poller: JobPoller<S>,
    config: JobPollerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<PollerStats>>,
) {
    info!(poller = %config.name, policy = %config.completion, "job poller started");
    let start_time = Instant::now();

    while !*shutdown_rx.borrow() {
        let result = poller.run_once(config.completion).await;

        let idle = {
            let mut s = lock_stats(&stats);
            s.uptime_secs = start_time.elapsed().as_secs();
            match &result {
                Ok(PollOutcome::Idle) => {
                    s.idle_polls += 1;
                    true
                }
                Ok(PollOutcome::Completed(_)) => {
                    s.claimed += 1;
                    s.completed += 1;
                    false
                }
                Ok(PollOutcome::Failed(_)) => {
                    s.claimed += 1;
                    s.failed += 1;
                    false
                }
                Ok(PollOutcome::Stranded { .. }) => {
                    s.claimed += 1;
                    s.store_errors += 1;
                    true
                }
                Err(_) => {
                    s.store_errors += 1;
                    true
                }
            }
        };

        if let Err(e) = &result {
            error!(poller = %config.name, error = %e, retryable = e.is_retryable(), "poll failed");
        }

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    info!(poller = %config.name, "job poller stopped");
}

fn lock_stats(stats: &Mutex<PollerStats>) -> MutexGuard<'_, PollerStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
