//! Engine wiring and the fire-and-forget processing loop.
//!
//! The engine owns construction of the orchestration components and is the
//! only place that persists terminal job status. Each accepted submission
//! runs as an independent spawned task; there is no central work queue.
//! Background loops keep system metrics fresh and recover stalled jobs.

use crate::catalog::ModelCapabilityCatalog;
use crate::fallback::FallbackExecutor;
use crate::imagestore::ImageVariantStore;
use crate::job::{current_timestamp_ms, Job, JobStatus, JobStore};
use crate::lifecycle::{CreateOutcome, JobLifecycleManager, LifecycleError, LifecyclePolicy};
use crate::metrics::{collect_system_metrics, new_shared_metrics, SharedMetrics};
use crate::pipeline::ProcessingPipeline;
use crate::prompt::PromptBuilder;
use crate::provider::{ConfigCache, ConfigurationProvider};
use crate::registry::{BackendRegistry, ClientFactory};
use crate::request::{validate, ProcessingMode, Submission, ValidationError};
use crate::retry::BackoffPolicy;
use crate::selector::ModelSelector;
use pixelmill_config::Config;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How many queued jobs one recovery pass will re-dispatch.
const RESUME_BATCH: usize = 16;

/// Error type for submissions
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The submission failed a pre-flight gate. No job row exists.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// The orchestration engine: components wired together plus shared metrics.
pub struct Engine {
    lifecycle: Arc<JobLifecycleManager>,
    pipeline: Arc<ProcessingPipeline>,
    selector: Arc<ModelSelector>,
    registry: Arc<BackendRegistry>,
    metrics: SharedMetrics,
}

impl Engine {
    /// Wire the engine from configuration and its collaborators.
    pub fn new(
        config: &Config,
        catalog: ModelCapabilityCatalog,
        provider: Arc<dyn ConfigurationProvider>,
        factory: ClientFactory,
        store: Arc<dyn JobStore>,
        images: Arc<dyn ImageVariantStore>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Arc<Self> {
        let cache = Arc::new(ConfigCache::new(
            provider,
            config.engine.config_ttl_secs * 1_000,
        ));
        let registry = Arc::new(BackendRegistry::new(cache, factory));
        let selector = Arc::new(ModelSelector::new(catalog, registry.clone()));
        let executor = Arc::new(FallbackExecutor::new(
            selector.clone(),
            registry.clone(),
            BackoffPolicy::from(&config.retry),
        ));
        let pipeline = Arc::new(ProcessingPipeline::new(
            executor,
            prompts,
            images,
            config.retry.max_retries_per_backend,
        ));
        let lifecycle = Arc::new(JobLifecycleManager::new(
            store,
            LifecyclePolicy::from(&config.engine),
        ));

        Arc::new(Self {
            lifecycle,
            pipeline,
            selector,
            registry,
            metrics: new_shared_metrics(),
        })
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycleManager> {
        &self.lifecycle
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    /// Accept a submission: validate, deduplicate, create the job row, and
    /// launch processing as an independent task.
    ///
    /// Validation runs before any side effect, so a rejected submission
    /// leaves no job behind. An idempotency match returns the existing job
    /// without spawning new work.
    pub async fn submit(self: Arc<Self>, submission: Submission) -> Result<CreateOutcome, SubmitError> {
        let mode = validate(&submission)?;

        let mut job = Job::new(submission.task);
        job.prompt = submission.prompt.clone();
        job.feature = submission.feature.clone();
        job.session_id = submission.session_id.clone();
        job.idempotency_key = submission.idempotency_key.clone();
        job.request = Some(submission.clone());

        let outcome = self.lifecycle.create(job).await?;
        if !outcome.created {
            return Ok(outcome);
        }
        self.metrics.write().await.upsert_job(&outcome.job);

        match self
            .selector
            .recommend(submission.task, submission.preferred_backend)
            .await
        {
            Ok(backend) => {
                debug!(job_id = %outcome.job.id, %backend, "initial backend recommendation");
            }
            Err(e) => {
                // An empty catalog means no amount of retrying will help.
                let job = self
                    .lifecycle
                    .transition(&outcome.job.id, JobStatus::Error, Some(e.to_string()), None)
                    .await?;
                let mut snapshot = self.metrics.write().await;
                snapshot.failed_jobs += 1;
                snapshot.upsert_job(&job);
                return Ok(CreateOutcome { job, created: true });
            }
        }

        Self::spawn_processing(&self, outcome.job.clone(), submission, mode);
        Ok(outcome)
    }

    fn spawn_processing(engine: &Arc<Self>, job: Job, submission: Submission, mode: ProcessingMode) {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine.process_job(job, submission, mode).await;
        });
    }

    /// One processing pass for a job. Terminal status is persisted here and
    /// nowhere else.
    async fn process_job(&self, job: Job, submission: Submission, mode: ProcessingMode) {
        let job_id = job.id.clone();

        // Another task may already own this job (e.g. a racing resume); the
        // atomic transition is the arbiter.
        let running = match self
            .lifecycle
            .transition(&job_id, JobStatus::Running, None, None)
            .await
        {
            Ok(job) => job,
            Err(LifecycleError::InvalidTransition(e)) => {
                debug!(job_id = %job_id, error = %e, "job no longer queued, skipping pass");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to mark job running");
                return;
            }
        };

        let running = match self.lifecycle.increment_attempts(&job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to count attempt");
                running
            }
        };
        self.metrics.write().await.upsert_job(&running);
        info!(job_id = %job_id, task = %running.task, attempt = running.attempts, "processing started");

        match self.pipeline.run(&running, &submission, &mode).await {
            Ok(output) => {
                if let Err(e) = self
                    .lifecycle
                    .attach_variants(&job_id, output.variant_ids.clone())
                    .await
                {
                    warn!(job_id = %job_id, error = %e, "failed to record variants on job");
                }
                match self
                    .lifecycle
                    .transition(&job_id, JobStatus::Done, None, Some(output.backend_used))
                    .await
                {
                    Ok(done) => {
                        let backends_tried: HashSet<_> =
                            output.chain.iter().map(|a| a.backend).collect();
                        let mut snapshot = self.metrics.write().await;
                        snapshot.completed_jobs += 1;
                        snapshot.variants_produced += output.variant_ids.len() as u64;
                        if backends_tried.len() > 1 {
                            snapshot.fallback_activations += 1;
                        }
                        snapshot.upsert_job(&done);
                        info!(
                            job_id = %job_id,
                            backend = %output.backend_used,
                            variants = output.variant_ids.len(),
                            "job done"
                        );
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "failed to mark job done");
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                match self
                    .lifecycle
                    .transition(&job_id, JobStatus::Error, Some(message.clone()), None)
                    .await
                {
                    Ok(failed) => {
                        let mut snapshot = self.metrics.write().await;
                        snapshot.failed_jobs += 1;
                        snapshot.upsert_job(&failed);
                        error!(job_id = %job_id, error = %message, "job failed");
                    }
                    Err(te) => {
                        error!(job_id = %job_id, error = %te, "failed to mark job failed");
                    }
                }
            }
        }
    }

    /// Re-dispatch queued jobs that carry their original submission.
    ///
    /// Jobs without a stored request are left for the surrounding system.
    pub async fn resume_retryable(self: Arc<Self>, limit: usize) -> usize {
        let jobs = match self.lifecycle.list_retryable(limit).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "failed to list retryable jobs");
                return 0;
            }
        };

        let mut resumed = 0;
        for job in jobs {
            let Some(submission) = job.request.clone() else {
                debug!(job_id = %job.id, "queued job has no stored request, skipping");
                continue;
            };
            match validate(&submission) {
                Ok(mode) => {
                    Self::spawn_processing(&self, job, submission, mode);
                    resumed += 1;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "stored request no longer valid");
                }
            }
        }
        resumed
    }

    /// Start the periodic system-metrics refresh.
    pub fn start_metrics_updater(&self) -> tokio::task::JoinHandle<()> {
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            loop {
                let system = collect_system_metrics();
                {
                    let mut snapshot = metrics.write().await;
                    snapshot.system = system;
                    snapshot.timestamp_unix_ms = current_timestamp_ms();
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }

    /// Start the periodic stalled-job recovery loop.
    ///
    /// Recovered jobs go back to `queued` (or `failed` once exhausted) and
    /// re-dispatchable ones are picked up in the same pass.
    pub fn start_stalled_recovery(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period_ms = (self.lifecycle.policy().stalled_after_ms / 2).max(5_000);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(period_ms)).await;
                match self.lifecycle.recover_stalled().await {
                    Ok(0) => {}
                    Ok(count) => {
                        self.metrics.write().await.recovered_jobs += count as u64;
                        info!(count, "recovered stalled jobs");
                        self.clone().resume_retryable(RESUME_BATCH).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "stalled-job recovery failed");
                    }
                }
            }
        })
    }
}
