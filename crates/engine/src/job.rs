//! Job rows, the status machine, and job persistence.
//!
//! A job is the unit of work: one accepted submission, advanced through a
//! small state machine by the lifecycle manager. Stores apply every status
//! change as a single atomic operation keyed by job id, so there is no
//! read-then-write race window around transitions. Jobs are persisted as
//! JSON files in a configured state directory.

use crate::catalog::{BackendId, TaskType};
use crate::request::Submission;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Longest error message kept in the sticky `last_error` field.
pub const LAST_ERROR_MAX_LEN: usize = 500;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job row exists but has not been accepted for processing.
    Pending,
    /// Job is waiting for a processing task.
    Queued,
    /// Job is being processed.
    Running,
    /// Job finished with at least one variant.
    Done,
    /// Job failed during processing.
    Error,
    /// Job exhausted its attempts and will not be retried.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

impl JobStatus {
    /// Check if the status is terminal (done, error, or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Failed)
    }

    /// Check if the status is active (pending, queued, or running).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Queued | JobStatus::Running
        )
    }

    /// The transition table. `running -> queued` is the retry re-entry for
    /// stalled or transiently failed jobs; terminal states accept nothing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Queued)
                | (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Error)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Queued)
        )
    }
}

/// Represents one accepted submission with full lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    /// What kind of work was requested.
    pub task: TaskType,
    /// Current status of the job.
    pub status: JobStatus,
    /// User-supplied prompt text, if any.
    pub prompt: Option<String>,
    /// Feature key that produced this job (e.g. "sketch_recolor").
    pub feature: Option<String>,
    /// Session the submission belongs to.
    pub session_id: Option<String>,
    /// Client-supplied deduplication token.
    pub idempotency_key: Option<String>,
    /// Backend that produced the result (set on completion).
    pub backend: Option<BackendId>,
    /// How many processing passes have started for this job.
    pub attempts: u32,
    /// Most recent error message; cleared by a later successful transition.
    pub error: Option<String>,
    /// Sticky failure record, capped in length, surviving later transitions.
    pub last_error: Option<String>,
    /// Unix timestamp (milliseconds) when the job was created/queued.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) when processing last started.
    pub started_at: Option<i64>,
    /// Unix timestamp (milliseconds) when the job reached a terminal state.
    pub finished_at: Option<i64>,
    /// Unix timestamp (milliseconds) of the last mutation.
    pub updated_at: i64,
    /// Result variant ids, in score order.
    pub variant_ids: Vec<String>,
    /// The original submission, kept so a recovered job can be re-dispatched.
    #[serde(default)]
    pub request: Option<Submission>,
}

impl Job {
    /// Create a new queued job for a task.
    pub fn new(task: TaskType) -> Self {
        let now = current_timestamp_ms();
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            status: JobStatus::Queued,
            prompt: None,
            feature: None,
            session_id: None,
            idempotency_key: None,
            backend: None,
            attempts: 0,
            error: None,
            last_error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            variant_ids: Vec::new(),
            request: None,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Error type for invalid status transitions
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One requested status change, applied atomically by a store.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub target: JobStatus,
    /// Error message accompanying `error`/`failed` targets.
    pub message: Option<String>,
    /// Backend to record on the job, when known.
    pub backend: Option<BackendId>,
    /// Attempt cap: a requeue at or past this count becomes `failed`.
    pub max_attempts: u32,
}

/// Apply a status update to a job in place.
///
/// This is the single place the state machine is enforced; stores call it
/// under their own lock so the check-and-set is atomic per job.
pub fn apply_status_update(
    job: &mut Job,
    update: &StatusUpdate,
    now_ms: i64,
) -> Result<(), TransitionError> {
    let mut target = update.target;

    // A retry re-entry past the attempt cap is forced into `failed`.
    if target == JobStatus::Queued
        && job.status == JobStatus::Running
        && job.attempts >= update.max_attempts
    {
        target = JobStatus::Failed;
    }

    if !job.status.can_transition_to(target) {
        return Err(TransitionError {
            from: job.status,
            to: target,
        });
    }

    job.status = target;
    match target {
        JobStatus::Running => job.started_at = Some(now_ms),
        JobStatus::Queued => job.started_at = None,
        JobStatus::Done | JobStatus::Error | JobStatus::Failed => job.finished_at = Some(now_ms),
        JobStatus::Pending => {}
    }

    if let Some(backend) = update.backend {
        job.backend = Some(backend);
    }

    match (&update.message, target) {
        (Some(msg), JobStatus::Error | JobStatus::Failed) => {
            job.error = Some(msg.clone());
            job.last_error = Some(cap_error(msg));
        }
        (Some(msg), _) => job.error = Some(msg.clone()),
        // Success clears the transient field; the sticky record survives.
        (None, JobStatus::Done) => job.error = None,
        (None, _) => {}
    }

    job.updated_at = now_ms;
    Ok(())
}

/// Truncate an error message to the sticky-field cap.
fn cap_error(msg: &str) -> String {
    if msg.len() <= LAST_ERROR_MAX_LEN {
        msg.to_string()
    } else {
        let mut end = LAST_ERROR_MAX_LEN;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg[..end].to_string()
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Error type for job store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(String),
}

/// Persistence collaborator for job rows.
///
/// `transition` and `increment_attempts` are atomic read-modify-writes keyed
/// by job id.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<Job, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Most recent job carrying `key`, created at or after `not_before_ms`.
    async fn find_by_idempotency_key(
        &self,
        key: &str,
        not_before_ms: i64,
    ) -> Result<Option<Job>, StoreError>;

    /// Apply a status update atomically. `Ok(None)` means no such job;
    /// `Err` on an invalid transition leaves the row untouched.
    async fn transition(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Option<Result<Job, TransitionError>>, StoreError>;

    /// Bump the attempt counter, returning the updated row.
    async fn increment_attempts(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Append result variant ids to the job.
    async fn attach_variants(
        &self,
        id: &str,
        variant_ids: Vec<String>,
    ) -> Result<Option<Job>, StoreError>;

    /// Queued jobs with attempts below the cap, oldest first.
    async fn list_retryable(
        &self,
        limit: usize,
        attempts_below: u32,
    ) -> Result<Vec<Job>, StoreError>;

    /// Running jobs whose last mutation predates `stale_before_ms`.
    async fn list_stalled(&self, stale_before_ms: i64) -> Result<Vec<Job>, StoreError>;
}

/// In-memory job store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
        not_before_ms: i64,
    ) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.idempotency_key.as_deref() == Some(key))
            .filter(|j| j.created_at >= not_before_ms)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Option<Result<Job, TransitionError>>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };
        match apply_status_update(job, &update, current_timestamp_ms()) {
            Ok(()) => Ok(Some(Ok(job.clone()))),
            Err(e) => Ok(Some(Err(e))),
        }
    }

    async fn increment_attempts(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };
        job.attempts += 1;
        job.updated_at = current_timestamp_ms();
        Ok(Some(job.clone()))
    }

    async fn attach_variants(
        &self,
        id: &str,
        variant_ids: Vec<String>,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };
        job.variant_ids.extend(variant_ids);
        job.updated_at = current_timestamp_ms();
        Ok(Some(job.clone()))
    }

    async fn list_retryable(
        &self,
        limit: usize,
        attempts_below: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut retryable: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.attempts < attempts_below)
            .cloned()
            .collect();
        retryable.sort_by_key(|j| j.created_at);
        retryable.truncate(limit);
        Ok(retryable)
    }

    async fn list_stalled(&self, stale_before_ms: i64) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.updated_at < stale_before_ms)
            .cloned()
            .collect())
    }
}

/// Job store persisting each job as `{job_id}.json` in a state directory.
///
/// The in-memory map is the source of truth at runtime; every mutation is
/// written through to disk so jobs survive a restart. Files that fail to
/// parse at load time are skipped with a warning.
pub struct JsonFileJobStore {
    state_dir: PathBuf,
    jobs: RwLock<HashMap<String, Job>>,
}

impl JsonFileJobStore {
    /// Open the store, loading any jobs already on disk.
    pub async fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let state_dir = state_dir.into();
        tokio::fs::create_dir_all(&state_dir).await?;

        let mut jobs = HashMap::new();
        let mut entries = tokio::fs::read_dir(&state_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_job_from_file(&path).await {
                Ok(job) => {
                    jobs.insert(job.id.clone(), job);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable job file");
                }
            }
        }

        Ok(Self {
            state_dir,
            jobs: RwLock::new(jobs),
        })
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", id))
    }

    async fn persist(&self, job: &Job) -> Result<(), StoreError> {
        let json =
            serde_json::to_string_pretty(job).map_err(|e| StoreError::Serde(e.to_string()))?;
        tokio::fs::write(self.job_path(&job.id), json).await?;
        Ok(())
    }
}

async fn load_job_from_file(path: &Path) -> Result<Job, StoreError> {
    let content = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| StoreError::Serde(e.to_string()))
}

#[async_trait::async_trait]
impl JobStore for JsonFileJobStore {
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job.id.clone(), job.clone());
        }
        self.persist(&job).await?;
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
        not_before_ms: i64,
    ) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.idempotency_key.as_deref() == Some(key))
            .filter(|j| j.created_at >= not_before_ms)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Option<Result<Job, TransitionError>>, StoreError> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(id) else {
                return Ok(None);
            };
            match apply_status_update(job, &update, current_timestamp_ms()) {
                Ok(()) => job.clone(),
                Err(e) => return Ok(Some(Err(e))),
            }
        };
        self.persist(&updated).await?;
        Ok(Some(Ok(updated)))
    }

    async fn increment_attempts(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(id) else {
                return Ok(None);
            };
            job.attempts += 1;
            job.updated_at = current_timestamp_ms();
            job.clone()
        };
        self.persist(&updated).await?;
        Ok(Some(updated))
    }

    async fn attach_variants(
        &self,
        id: &str,
        variant_ids: Vec<String>,
    ) -> Result<Option<Job>, StoreError> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(id) else {
                return Ok(None);
            };
            job.variant_ids.extend(variant_ids);
            job.updated_at = current_timestamp_ms();
            job.clone()
        };
        self.persist(&updated).await?;
        Ok(Some(updated))
    }

    async fn list_retryable(
        &self,
        limit: usize,
        attempts_below: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut retryable: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.attempts < attempts_below)
            .cloned()
            .collect();
        retryable.sort_by_key(|j| j.created_at);
        retryable.truncate(limit);
        Ok(retryable)
    }

    async fn list_stalled(&self, stale_before_ms: i64) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.updated_at < stale_before_ms)
            .cloned()
            .collect())
    }
}
