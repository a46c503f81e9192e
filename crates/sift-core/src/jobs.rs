//! Asynchronous job manager
//!
//! Every job runs on its own spawned task and owns a `watch` channel. The
//! job's [`JobReporter`] is the only writer; pollers read the latest snapshot
//! and subscribers are woken on every change. Progress never decreases and a
//! terminal status is never left.
//!
//! Cancellation is cooperative. `cancel` takes the job's commit gate, so once
//! it returns no write performed through [`JobReporter::commit`] can start.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Job, JobKind, JobStatus};

/// File produced by a job, downloadable until it expires
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub job_id: String,
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Artifact content returned by a job body
#[derive(Debug, Clone)]
pub struct ArtifactPayload {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// What a successful job body hands back to the manager
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub message: String,
    pub result_ref: Option<String>,
    /// Merged into the job's details
    pub details: Value,
    pub artifact: Option<ArtifactPayload>,
}

struct JobEntry {
    state: watch::Sender<Job>,
    cancelled: AtomicBool,
    gate: tokio::sync::Mutex<()>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        let (state, _) = watch::channel(job);
        Self {
            state,
            cancelled: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Job {
        self.state.borrow().clone()
    }
}

fn merge_object(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                target.insert(key, value);
            }
        }
        (target, patch) if !patch.is_null() => *target = patch,
        _ => {}
    }
}

/// Write handle for one job
///
/// Clones share the same job.
#[derive(Clone)]
pub struct JobReporter {
    entry: Arc<JobEntry>,
    db: Option<Database>,
    max_preview: usize,
}

impl JobReporter {
    /// A reporter not registered with any manager
    ///
    /// Used to run a job body inline without a manager. Nothing is
    /// persisted; callers observe progress through [`subscribe`](Self::subscribe).
    pub fn detached(kind: JobKind, caller: &str) -> Self {
        Self {
            entry: Arc::new(JobEntry::new(new_job(kind, caller))),
            db: None,
            max_preview: 20,
        }
    }

    pub fn job_id(&self) -> String {
        self.entry.state.borrow().job_id.clone()
    }

    pub fn snapshot(&self) -> Job {
        self.entry.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.entry.state.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Error::Cancelled` once the job has been cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Apply a change unless the job is already terminal; returns whether it applied
    fn update(&self, f: impl FnOnce(&mut Job)) -> bool {
        self.entry.state.send_if_modified(|job| {
            if job.status.is_terminal() {
                return false;
            }
            f(job);
            job.updated_at = Utc::now();
            true
        })
    }

    fn persist(&self) {
        if let Some(db) = &self.db {
            if let Err(e) = db.save_job(&self.snapshot()) {
                warn!(job_id = %self.job_id(), error = %e, "Failed to persist job snapshot");
            }
        }
    }

    /// Enter a stage: sets the stage name, message and progress, and persists
    pub fn stage(&self, stage: &str, progress: u8, message: impl Into<String>) {
        let message = message.into();
        let applied = self.update(|job| {
            job.status = JobStatus::Processing;
            job.stage = stage.to_string();
            job.progress = job.progress.max(progress.min(99));
            job.message = message.clone();
        });
        if applied {
            info!(job_id = %self.job_id(), stage, progress, %message, "Job stage");
            self.persist();
        }
    }

    /// Report progress within the current stage (not persisted)
    pub fn progress(&self, progress: u8, message: impl Into<String>) {
        let message = message.into();
        self.update(|job| {
            job.progress = job.progress.max(progress.min(99));
            job.message = message;
        });
    }

    /// Merge a JSON object into the job's details
    pub fn details(&self, patch: Value) {
        self.update(|job| merge_object(&mut job.details, patch));
    }

    /// Record the itemized error and warning previews, capped
    pub fn previews<E: Serialize, W: Serialize>(&self, errors: &[E], warnings: &[W]) {
        let cap = self.max_preview;
        let errors: Vec<Value> = errors
            .iter()
            .take(cap)
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect();
        let warnings: Vec<Value> = warnings
            .iter()
            .take(cap)
            .filter_map(|w| serde_json::to_value(w).ok())
            .collect();
        self.update(|job| {
            job.errors = errors;
            job.warnings = warnings;
        });
    }

    /// Run a persistence step under the commit gate
    ///
    /// Fails with `Error::Cancelled` without running `f` if the job was
    /// cancelled; a concurrent `cancel` waits until `f` has finished.
    pub async fn commit<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _gate = self.entry.gate.lock().await;
        self.check_cancelled()?;
        f()
    }

    fn finish(&self, status: JobStatus, message: String, outcome: Option<&JobOutcome>) {
        let applied = self.update(|job| {
            job.status = status;
            job.message = message.clone();
            if status == JobStatus::Completed {
                job.progress = 100;
                job.stage = "completed".to_string();
            }
            if let Some(outcome) = outcome {
                job.result_ref = outcome.result_ref.clone();
                merge_object(&mut job.details, outcome.details.clone());
            }
        });
        if applied {
            info!(job_id = %self.job_id(), status = status.as_str(), %message, "Job finished");
            self.persist();
        }
    }

    /// Record the result of a job body
    pub fn complete_with(&self, result: &Result<JobOutcome>) {
        match result {
            Ok(outcome) => self.finish(JobStatus::Completed, outcome.message.clone(), Some(outcome)),
            Err(Error::Cancelled) => {
                self.finish(JobStatus::Cancelled, "Cancelled".to_string(), None)
            }
            Err(e) => self.finish(JobStatus::Failed, e.to_string(), None),
        }
    }
}

fn new_job(kind: JobKind, caller: &str) -> Job {
    let now = Utc::now();
    Job {
        job_id: Uuid::new_v4().to_string(),
        kind,
        status: JobStatus::Pending,
        progress: 0,
        stage: "pending".to_string(),
        message: "Queued".to_string(),
        details: json!({}),
        errors: Vec::new(),
        warnings: Vec::new(),
        result_ref: None,
        caller: caller.to_string(),
        created_at: now,
        updated_at: now,
    }
}

pub struct JobManager {
    db: Database,
    jobs: Mutex<HashMap<String, Arc<JobEntry>>>,
    artifacts: Mutex<HashMap<String, Artifact>>,
    artifact_ttl: Duration,
    max_preview: usize,
}

impl JobManager {
    pub fn new(db: Database, artifact_ttl: std::time::Duration, max_preview: usize) -> Self {
        Self {
            db,
            jobs: Mutex::new(HashMap::new()),
            artifacts: Mutex::new(HashMap::new()),
            artifact_ttl: Duration::from_std(artifact_ttl).unwrap_or_else(|_| Duration::hours(1)),
            max_preview,
        }
    }

    fn entry(&self, job_id: &str) -> Option<Arc<JobEntry>> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
    }

    /// Create a job and run `body` on its own task
    ///
    /// Returns the job snapshot as created (status `pending`).
    pub fn spawn<F, Fut>(self: &Arc<Self>, kind: JobKind, caller: &str, body: F) -> Job
    where
        F: FnOnce(JobReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let job = new_job(kind, caller);
        let entry = Arc::new(JobEntry::new(job.clone()));
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.job_id.clone(), Arc::clone(&entry));

        if let Err(e) = self.db.save_job(&job) {
            warn!(job_id = %job.job_id, error = %e, "Failed to persist new job");
        }
        info!(job_id = %job.job_id, kind = kind.as_str(), caller, "Job created");

        let reporter = JobReporter {
            entry,
            db: Some(self.db.clone()),
            max_preview: self.max_preview,
        };
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            reporter.update(|job| job.status = JobStatus::Processing);

            // The body runs on its own task so a panic still ends the job
            let result = match tokio::spawn(body(reporter.clone())).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(job_id = %reporter.job_id(), error = %e, "Job task aborted");
                    reporter.finish(JobStatus::Failed, "Job panicked".to_string(), None);
                    return;
                }
            };

            if let Ok(JobOutcome {
                artifact: Some(payload),
                ..
            }) = &result
            {
                manager.store_artifact(&reporter.job_id(), payload.clone());
            }

            reporter.complete_with(&result);
        });

        job
    }

    fn store_artifact(&self, job_id: &str, payload: ArtifactPayload) {
        let now = Utc::now();
        let artifact = Artifact {
            job_id: job_id.to_string(),
            filename: payload.filename,
            content_type: payload.content_type,
            data: payload.data,
            created_at: now,
            expires_at: now + self.artifact_ttl,
        };
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.to_string(), artifact);
    }

    /// Current status of a job, falling back to persisted snapshots
    pub fn get_status(&self, job_id: &str) -> Result<Job> {
        if let Some(entry) = self.entry(job_id) {
            return Ok(entry.snapshot());
        }
        self.db
            .get_job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))
    }

    /// Recent jobs, newest first; live snapshots replace persisted ones
    pub fn list(&self, limit: i64) -> Result<Vec<Job>> {
        let mut jobs = self.db.list_jobs(limit)?;
        for job in jobs.iter_mut() {
            if let Some(entry) = self.entry(&job.job_id) {
                *job = entry.snapshot();
            }
        }
        Ok(jobs)
    }

    /// Receive every change to a live job
    pub fn subscribe(&self, job_id: &str) -> Option<watch::Receiver<Job>> {
        self.entry(job_id).map(|e| e.state.subscribe())
    }

    /// Wait until a live job reaches a terminal status
    pub async fn wait(&self, job_id: &str) -> Result<Job> {
        let Some(mut rx) = self.subscribe(job_id) else {
            return self.get_status(job_id);
        };
        let job = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map_err(|_| Error::NotFound(format!("Job {} is gone", job_id)))?
            .clone();
        Ok(job)
    }

    /// Cancel a pending or processing job
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let Some(entry) = self.entry(job_id) else {
            return match self.db.get_job(job_id)? {
                Some(job) => Err(Error::Conflict(format!(
                    "Job {} is {} and cannot be cancelled",
                    job_id,
                    job.status.as_str()
                ))),
                None => Err(Error::NotFound(format!("Job {} not found", job_id))),
            };
        };

        let _gate = entry.gate.lock().await;
        let status = entry.state.borrow().status;
        if status.is_terminal() {
            return Err(Error::Conflict(format!(
                "Job {} is {} and cannot be cancelled",
                job_id,
                status.as_str()
            )));
        }

        entry.cancelled.store(true, Ordering::SeqCst);
        let reporter = JobReporter {
            entry: Arc::clone(&entry),
            db: Some(self.db.clone()),
            max_preview: self.max_preview,
        };
        reporter.finish(JobStatus::Cancelled, "Cancelled by caller".to_string(), None);

        Ok(entry.snapshot())
    }

    /// Download a completed job's artifact
    pub fn artifact(&self, job_id: &str) -> Result<Artifact> {
        let job = self.get_status(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(Error::Conflict(format!(
                "Job {} is {}, artifact not available",
                job_id,
                job.status.as_str()
            )));
        }

        let mut artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        match artifacts.get(job_id) {
            Some(a) if a.expires_at > Utc::now() => Ok(a.clone()),
            Some(_) => {
                artifacts.remove(job_id);
                Err(Error::NotFound(format!("Artifact for job {} has expired", job_id)))
            }
            None => Err(Error::NotFound(format!("No artifact for job {}", job_id))),
        }
    }

    /// Drop expired artifacts and finished jobs older than the artifact TTL
    pub fn prune(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        {
            let mut artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
            let before = artifacts.len();
            artifacts.retain(|_, a| a.expires_at > now);
            removed += before - artifacts.len();
        }

        let cutoff = now - self.artifact_ttl;
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let job = entry.state.borrow();
            !(job.status.is_terminal() && job.updated_at < cutoff)
        });
        removed += before - jobs.len();

        removed
    }
}
