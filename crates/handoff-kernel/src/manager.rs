//! Authoritative job registry and the operations callers use to drive it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use action_primitives::validate;
use cdp_adapter::BrowserDriver;
use chrono::{DateTime, Utc};
use handoff_core_types::{FailureKind, Job, JobId, JobResult, JobStatus};
use handoff_scheduler::{metrics as pool_metrics, PoolConfig, SessionPool};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, NotifyConfig};
use crate::error::EngineError;
use crate::executor;
use crate::notify::Notifier;

const EVENT_CAPACITY: usize = 256;

/// One accepted status transition.
#[derive(Clone, Debug, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}

struct JobEntry {
    job: Job,
    code_tx: Option<oneshot::Sender<String>>,
}

/// State shared between the manager handle and every job loop.
pub(crate) struct EngineShared {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    events: broadcast::Sender<JobEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) pool: SessionPool,
    pub(crate) cfg: EngineConfig,
    pub(crate) notifier: Notifier,
}

impl EngineShared {
    /// Publishes an accepted transition. Callers hold the registry write lock so
    /// events for one job arrive in the order they were applied.
    fn emit(&self, job_id: JobId, from: JobStatus, to: JobStatus) {
        debug!(job_id = %job_id, %from, %to, "job transition");
        // no subscribers is fine
        let _ = self.events.send(JobEvent {
            job_id,
            from,
            to,
            at: Utc::now(),
        });
    }

    pub(crate) fn snapshot(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).map(|entry| entry.job.clone())
    }

    /// Moves a job along a non-terminal edge.
    pub(crate) fn transition(&self, id: JobId, next: JobStatus) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let from = entry.job.transition(next)?;
        self.emit(id, from, next);
        Ok(())
    }

    /// Writes the terminal status and result. Returns `false` when the job was
    /// already terminal, which leaves it untouched.
    pub(crate) fn finish(&self, id: JobId, status: JobStatus, result: JobResult) -> bool {
        let mut jobs = self.jobs.write();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        if entry.job.is_terminal() {
            return false;
        }
        match entry.job.finish(status, result) {
            Ok(from) => {
                entry.code_tx = None;
                self.emit(id, from, status);
                true
            }
            Err(err) => {
                warn!(job_id = %id, %err, "refusing terminal transition");
                false
            }
        }
    }

    pub(crate) fn advance(&self, id: JobId, index: usize) {
        if let Some(entry) = self.jobs.write().get_mut(&id) {
            entry.job.advance_to(index);
        }
    }

    /// Flips a running job to AwaitingCode and arms its code signal.
    pub(crate) fn await_code(&self, id: JobId) -> Result<oneshot::Receiver<String>, EngineError> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let from = entry.job.transition(JobStatus::AwaitingCode)?;
        let (tx, rx) = oneshot::channel();
        entry.code_tx = Some(tx);
        self.emit(id, from, JobStatus::AwaitingCode);
        Ok(rx)
    }

    /// Called when the code wait expired. Fails the job unless a code slipped in
    /// first, in which case `false` is returned and the code is in the channel.
    pub(crate) fn expire_code_wait(&self, id: JobId, waited: Duration) -> bool {
        let mut jobs = self.jobs.write();
        let Some(entry) = jobs.get_mut(&id) else {
            return true;
        };
        if entry.job.status != JobStatus::AwaitingCode {
            return entry.job.is_terminal();
        }
        entry.code_tx = None;
        let index = entry.job.current_action;
        let result = JobResult::failure(
            FailureKind::Timeout,
            format!("no second-factor code received within {}", humantime::format_duration(waited)),
            "timed out waiting for second-factor code",
        )
        .at_action(index);
        match entry.job.finish(JobStatus::Failed, result) {
            Ok(from) => self.emit(id, from, JobStatus::Failed),
            Err(err) => warn!(job_id = %id, %err, "could not fail expired job"),
        }
        true
    }
}

/// Handle to the task execution engine. Cheap to clone.
#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<EngineShared>,
}

impl TaskManager {
    pub fn new(driver: Arc<dyn BrowserDriver>, cfg: EngineConfig) -> Self {
        Self::with_notifier(driver, cfg, Notifier::new(NotifyConfig::default()))
    }

    pub fn with_notifier(driver: Arc<dyn BrowserDriver>, cfg: EngineConfig, notifier: Notifier) -> Self {
        let pool = SessionPool::new(
            driver,
            PoolConfig {
                max_sessions: cfg.max_sessions,
                acquire_timeout: cfg.acquire_timeout,
            },
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(EngineShared {
                jobs: RwLock::new(HashMap::new()),
                events,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                pool,
                cfg,
                notifier,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.cfg
    }

    /// Validates and registers `job`, then starts its loop. Returns immediately.
    pub fn submit(&self, mut job: Job) -> Result<JobId, EngineError> {
        if self.shared.cancel.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        for (index, action) in job.actions.iter().enumerate() {
            validate(action, job.credentials.as_ref())
                .map_err(|source| EngineError::Validation { index, source })?;
        }
        if let Some(url) = &job.callback_url {
            check_callback(url)?;
        }

        job.status = JobStatus::Pending;
        job.current_action = 0;
        job.result = None;
        let id = job.id;
        let action_count = job.actions.len();

        {
            let mut jobs = self.shared.jobs.write();
            if jobs.contains_key(&id) {
                return Err(EngineError::AlreadyExists(id));
            }
            jobs.insert(id, JobEntry { job, code_tx: None });
        }

        info!(job_id = %id, actions = action_count, "job submitted");
        self.shared
            .tracker
            .spawn(executor::run_job(Arc::clone(&self.shared), id));
        Ok(id)
    }

    /// Independent copy of the job's current state.
    pub fn status(&self, id: JobId) -> Result<Job, EngineError> {
        self.shared.snapshot(id).ok_or(EngineError::NotFound(id))
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .shared
            .jobs
            .read()
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Delivers a second-factor code to a job that is waiting for one.
    pub fn provide_code(&self, id: JobId, code: impl Into<String>) -> Result<(), EngineError> {
        let mut jobs = self.shared.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        if entry.job.status != JobStatus::AwaitingCode {
            return Err(EngineError::NotAwaitingCode {
                id,
                status: entry.job.status,
            });
        }
        let tx = entry.code_tx.take().ok_or(EngineError::SignalUnavailable(id))?;
        if tx.send(code.into()).is_err() {
            return Err(EngineError::SignalUnavailable(id));
        }
        let from = entry.job.transition(JobStatus::Running)?;
        self.shared.emit(id, from, JobStatus::Running);
        drop(jobs);
        info!(job_id = %id, "second-factor code delivered");
        Ok(())
    }

    /// Resolves once the job reaches a terminal status.
    pub async fn wait_terminal(&self, id: JobId) -> Result<Job, EngineError> {
        let mut events = self.subscribe();
        loop {
            let job = self.status(id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.status(id),
            }
        }
    }

    /// Cancels every unfinished job, stops the loops and waits for them up to `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), EngineError> {
        let mut cancelled = 0usize;
        {
            let mut jobs = self.shared.jobs.write();
            for (id, entry) in jobs.iter_mut() {
                if entry.job.is_terminal() {
                    continue;
                }
                entry.code_tx = None;
                let index = entry.job.current_action;
                let result = JobResult::failure(
                    FailureKind::Cancelled,
                    "job cancelled by engine shutdown",
                    "engine shut down before the job finished",
                )
                .at_action(index);
                if let Ok(from) = entry.job.finish(JobStatus::Cancelled, result) {
                    self.shared.emit(*id, from, JobStatus::Cancelled);
                    cancelled += 1;
                }
            }
        }
        info!(cancelled, "engine shutting down");

        self.shared.cancel.cancel();
        self.shared.pool.close();
        self.shared.tracker.close();
        let drained = tokio::time::timeout(deadline, self.shared.tracker.wait()).await;
        self.shared.pool.driver().shutdown().await;

        let counters = pool_metrics::snapshot();
        info!(
            acquired = counters.acquired,
            released = counters.released,
            timed_out = counters.timed_out,
            peak_in_use = counters.peak_in_use,
            "session pool counters at shutdown"
        );

        drained.map_err(|_| EngineError::DeadlineExceeded(deadline))
    }
}

fn check_callback(url: &str) -> Result<(), EngineError> {
    let parsed = reqwest::Url::parse(url).map_err(|err| EngineError::InvalidCallback {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(EngineError::InvalidCallback {
            url: url.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
