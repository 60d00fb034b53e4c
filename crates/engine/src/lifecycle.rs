//! Job lifecycle management.
//!
//! Owns the state machine around job rows: idempotent creation, validated
//! status transitions, attempt counting, stalled-job recovery, and the
//! retryable listing. The manager is the only component that persists
//! terminal status; the processing pipeline reports results back to it and
//! never touches the job row directly.

use crate::catalog::BackendId;
use crate::job::{Job, JobStatus, JobStore, StatusUpdate, StoreError, TransitionError};
use pixelmill_config::EngineConfig;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Error type for lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("job {0} not found")]
    JobNotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle limits, derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    /// Attempts before a job is forced into `failed`.
    pub max_attempts: u32,
    /// How long a job may sit in `running` before it counts as stalled.
    pub stalled_after_ms: u64,
    /// How long an idempotency key deduplicates.
    pub idempotency_window_ms: u64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for LifecyclePolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            stalled_after_ms: config.stalled_after_secs * 1_000,
            idempotency_window_ms: config.idempotency_window_secs * 1_000,
        }
    }
}

/// Outcome of a create call: the job, and whether it is new.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub job: Job,
    /// False when an idempotency match resolved to an existing job.
    pub created: bool,
}

/// Owns job state machine operations on top of a [`JobStore`].
pub struct JobLifecycleManager {
    store: Arc<dyn JobStore>,
    policy: LifecyclePolicy,
}

impl JobLifecycleManager {
    pub fn new(store: Arc<dyn JobStore>, policy: LifecyclePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a job, deduplicating by idempotency key first.
    ///
    /// The key lookup happens before any side effect: a non-expired match
    /// returns the existing job unchanged, with no new row and no new work.
    pub async fn create(&self, job: Job) -> Result<CreateOutcome, LifecycleError> {
        if let Some(key) = job.idempotency_key.as_deref() {
            let not_before =
                current_timestamp_ms().saturating_sub(self.policy.idempotency_window_ms as i64);
            if let Some(existing) = self.store.find_by_idempotency_key(key, not_before).await? {
                info!(job_id = %existing.id, key, "idempotency match, reusing existing job");
                return Ok(CreateOutcome {
                    job: existing,
                    created: false,
                });
            }
        }

        let job = self.store.insert(job).await?;
        info!(job_id = %job.id, task = %job.task, "job created");
        Ok(CreateOutcome { job, created: true })
    }

    /// Fetch a job row.
    pub async fn get(&self, job_id: &str) -> Result<Job, LifecycleError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| LifecycleError::JobNotFound(job_id.to_string()))
    }

    /// Apply a validated status transition.
    ///
    /// A requeue at or past the attempt cap is recorded as `failed` instead.
    /// Messages accompanying `error`/`failed` land in the sticky last-error
    /// field as well as the transient one.
    pub async fn transition(
        &self,
        job_id: &str,
        target: JobStatus,
        message: Option<String>,
        backend: Option<BackendId>,
    ) -> Result<Job, LifecycleError> {
        let update = StatusUpdate {
            target,
            message,
            backend,
            max_attempts: self.policy.max_attempts,
        };
        match self.store.transition(job_id, update).await? {
            None => Err(LifecycleError::JobNotFound(job_id.to_string())),
            Some(Err(e)) => Err(LifecycleError::InvalidTransition(e)),
            Some(Ok(job)) => Ok(job),
        }
    }

    /// Bump the attempt counter for a job.
    pub async fn increment_attempts(&self, job_id: &str) -> Result<Job, LifecycleError> {
        self.store
            .increment_attempts(job_id)
            .await?
            .ok_or_else(|| LifecycleError::JobNotFound(job_id.to_string()))
    }

    /// Record result variants on a job.
    pub async fn attach_variants(
        &self,
        job_id: &str,
        variant_ids: Vec<String>,
    ) -> Result<Job, LifecycleError> {
        self.store
            .attach_variants(job_id, variant_ids)
            .await?
            .ok_or_else(|| LifecycleError::JobNotFound(job_id.to_string()))
    }

    /// Move jobs stuck in `running` past the staleness threshold back to
    /// `queued`, or to `failed` once their attempts are exhausted. Returns
    /// how many jobs were recovered either way.
    pub async fn recover_stalled(&self) -> Result<usize, LifecycleError> {
        let cutoff = current_timestamp_ms().saturating_sub(self.policy.stalled_after_ms as i64);
        let stalled = self.store.list_stalled(cutoff).await?;

        let mut recovered = 0;
        for job in stalled {
            match self
                .transition(
                    &job.id,
                    JobStatus::Queued,
                    Some("worker stalled mid-processing".to_string()),
                    None,
                )
                .await
            {
                Ok(updated) => {
                    info!(job_id = %updated.id, status = %updated.status, "recovered stalled job");
                    recovered += 1;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to recover stalled job");
                }
            }
        }

        Ok(recovered)
    }

    /// Queued jobs with attempts below the cap, oldest first.
    pub async fn list_retryable(&self, limit: usize) -> Result<Vec<Job>, LifecycleError> {
        Ok(self
            .store
            .list_retryable(limit, self.policy.max_attempts)
            .await?)
    }
}

fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TaskType;
    use crate::job::InMemoryJobStore;

    fn manager() -> JobLifecycleManager {
        manager_with_policy(LifecyclePolicy {
            max_attempts: 3,
            stalled_after_ms: 60_000,
            idempotency_window_ms: 600_000,
        })
    }

    fn manager_with_policy(policy: LifecyclePolicy) -> JobLifecycleManager {
        JobLifecycleManager::new(Arc::new(InMemoryJobStore::new()), policy)
    }

    fn keyed_job(key: &str) -> Job {
        let mut job = Job::new(TaskType::Edit);
        job.idempotency_key = Some(key.to_string());
        job
    }

    #[tokio::test]
    async fn test_same_key_resolves_to_same_job() {
        let manager = manager();

        let first = manager.create(keyed_job("key-1")).await.unwrap();
        assert!(first.created);

        let second = manager.create(keyed_job("key-1")).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.job.id, second.job.id);
    }

    #[tokio::test]
    async fn test_different_keys_create_distinct_jobs() {
        let manager = manager();

        let first = manager.create(keyed_job("key-1")).await.unwrap();
        let second = manager.create(keyed_job("key-2")).await.unwrap();

        assert!(second.created);
        assert_ne!(first.job.id, second.job.id);
    }

    #[tokio::test]
    async fn test_expired_key_creates_new_job() {
        let manager = manager_with_policy(LifecyclePolicy {
            max_attempts: 3,
            stalled_after_ms: 60_000,
            idempotency_window_ms: 1,
        });

        let mut stale = keyed_job("key-1");
        // Created far enough in the past to fall outside the 1ms window.
        stale.created_at -= 10_000;
        manager.store().insert(stale).await.unwrap();

        let outcome = manager.create(keyed_job("key-1")).await.unwrap();
        assert!(outcome.created);
    }

    #[tokio::test]
    async fn test_jobs_without_keys_never_deduplicate() {
        let manager = manager();

        let first = manager.create(Job::new(TaskType::Edit)).await.unwrap();
        let second = manager.create(Job::new(TaskType::Edit)).await.unwrap();

        assert!(first.created && second.created);
        assert_ne!(first.job.id, second.job.id);
    }

    #[tokio::test]
    async fn test_transition_unknown_job() {
        let manager = manager();
        let err = manager
            .transition("missing", JobStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_transition_records_backend_and_error() {
        let manager = manager();
        let job = manager.create(Job::new(TaskType::Edit)).await.unwrap().job;

        manager
            .transition(&job.id, JobStatus::Running, None, None)
            .await
            .unwrap();
        let failed = manager
            .transition(
                &job.id,
                JobStatus::Error,
                Some("all backends exhausted".to_string()),
                Some(BackendId::Flux),
            )
            .await
            .unwrap();

        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.backend, Some(BackendId::Flux));
        assert_eq!(failed.last_error.as_deref(), Some("all backends exhausted"));
    }

    #[tokio::test]
    async fn test_attempts_are_monotonic() {
        let manager = manager();
        let job = manager.create(Job::new(TaskType::Edit)).await.unwrap().job;

        let mut last = 0;
        for _ in 0..5 {
            let updated = manager.increment_attempts(&job.id).await.unwrap();
            assert!(updated.attempts > last);
            last = updated.attempts;
        }
    }

    #[tokio::test]
    async fn test_requeue_past_cap_forced_to_failed() {
        let manager = manager();
        let job = manager.create(Job::new(TaskType::Edit)).await.unwrap().job;

        for _ in 0..3 {
            manager.increment_attempts(&job.id).await.unwrap();
        }
        manager
            .transition(&job.id, JobStatus::Running, None, None)
            .await
            .unwrap();

        let updated = manager
            .transition(
                &job.id,
                JobStatus::Queued,
                Some("transient failure".to_string()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_recover_stalled_requeues_fresh_jobs() {
        let manager = manager_with_policy(LifecyclePolicy {
            max_attempts: 3,
            stalled_after_ms: 1_000,
            idempotency_window_ms: 600_000,
        });

        // A running job whose last activity predates the staleness window.
        let mut stalled = Job::new(TaskType::Edit);
        stalled.status = JobStatus::Running;
        stalled.attempts = 1;
        stalled.updated_at = current_timestamp_ms() - 10_000;
        let stalled = manager.store().insert(stalled).await.unwrap();

        // A running job that is still fresh.
        let mut fresh = Job::new(TaskType::Edit);
        fresh.status = JobStatus::Running;
        manager.store().insert(fresh).await.unwrap();

        let recovered = manager.recover_stalled().await.unwrap();
        assert_eq!(recovered, 1);

        let job = manager.get(&stalled.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_recover_stalled_fails_exhausted_jobs() {
        let manager = manager_with_policy(LifecyclePolicy {
            max_attempts: 2,
            stalled_after_ms: 1_000,
            idempotency_window_ms: 600_000,
        });

        let mut stalled = Job::new(TaskType::Edit);
        stalled.status = JobStatus::Running;
        stalled.attempts = 2;
        stalled.updated_at = current_timestamp_ms() - 10_000;
        let stalled = manager.store().insert(stalled).await.unwrap();

        let recovered = manager.recover_stalled().await.unwrap();
        assert_eq!(recovered, 1);

        let job = manager.get(&stalled.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.is_some());
    }

    #[tokio::test]
    async fn test_list_retryable_respects_cap() {
        let manager = manager();

        let job = manager.create(Job::new(TaskType::Edit)).await.unwrap().job;
        let mut exhausted = Job::new(TaskType::Edit);
        exhausted.attempts = 3;
        manager.store().insert(exhausted).await.unwrap();

        let retryable = manager.list_retryable(10).await.unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].id, job.id);
    }
}
