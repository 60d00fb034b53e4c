//! Processing pipeline: turns a job plus its submission into persisted,
//! scored variants.
//!
//! The pipeline is side-effect-transparent about job state: it returns a
//! result value and never writes job status itself. Only the engine, via the
//! lifecycle manager, persists terminal status. Variant-level persistence
//! failures are logged and skipped; a batch that ends with zero variants is
//! an error, never an empty success.

use crate::backend::{GenerateOptions, ImageData, ProcessOptions, ProcessOutput, ProducedImage};
use crate::catalog::{BackendId, TaskType};
use crate::fallback::{FallbackAttempt, FallbackError, FallbackExecutor, FallbackSuccess};
use crate::imagestore::{ImageVariantStore, NewVariant};
use crate::job::Job;
use crate::prompt::{PromptBuilder, PromptRequest};
use crate::request::{ProcessingMode, Submission};
use crate::scoring::variant_score;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for pipeline execution
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no backends available")]
    NoBackendsAvailable,

    #[error("Step 1 failed: {0}")]
    StepOneFailed(String),

    #[error("Step 2 failed: {0}")]
    StepTwoFailed(String),

    #[error("all backends exhausted: {0}")]
    Exhausted(String),

    #[error("no variants produced")]
    NoVariantsProduced,

    #[error("source image unavailable: {0}")]
    SourceImage(String),

    #[error("prompt construction produced no prompt")]
    EmptyPrompt,
}

/// Successful pipeline run: persisted variant ids plus the fallback trail.
#[derive(Debug)]
pub struct PipelineOutput {
    pub variant_ids: Vec<String>,
    pub backend_used: BackendId,
    pub chain: Vec<FallbackAttempt>,
}

/// Composes processing flows on top of the fallback executor.
pub struct ProcessingPipeline {
    executor: Arc<FallbackExecutor>,
    prompts: Arc<dyn PromptBuilder>,
    images: Arc<dyn ImageVariantStore>,
    max_retries_per_backend: u32,
}

impl ProcessingPipeline {
    pub fn new(
        executor: Arc<FallbackExecutor>,
        prompts: Arc<dyn PromptBuilder>,
        images: Arc<dyn ImageVariantStore>,
        max_retries_per_backend: u32,
    ) -> Self {
        Self {
            executor,
            prompts,
            images,
            max_retries_per_backend,
        }
    }

    /// Run the flow the submission's mode calls for.
    pub async fn run(
        &self,
        job: &Job,
        submission: &Submission,
        mode: &ProcessingMode,
    ) -> Result<PipelineOutput, PipelineError> {
        let prompts = self
            .prompts
            .build(&PromptRequest {
                task: submission.task,
                user_text: submission.prompt.clone(),
                feature: submission.feature.clone(),
                prior_edit: submission.prior_edit,
            })
            .await;
        let primary_prompt = prompts.into_iter().next().ok_or(PipelineError::EmptyPrompt)?;

        if submission.task == TaskType::Export {
            return self.run_generate(job, submission, &primary_prompt).await;
        }

        match mode {
            ProcessingMode::TwoStep { secondary_prompt } => {
                self.run_two_step(job, submission, &primary_prompt, secondary_prompt)
                    .await
            }
            _ => self.run_single(job, submission, mode, &primary_prompt).await,
        }
    }

    /// Single-step path, covering plain, dual-image, and masked processing.
    async fn run_single(
        &self,
        job: &Job,
        submission: &Submission,
        mode: &ProcessingMode,
        prompt: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let source = self.load_source(submission).await?;

        let secondary_image = match mode {
            ProcessingMode::DualImage => Some(self.load_second(submission).await?),
            _ => None,
        };
        let mask = match mode {
            ProcessingMode::Masked => submission.mask.clone(),
            _ => None,
        };

        let success = self
            .execute_process(
                submission,
                source,
                ProcessOptions {
                    prompt: prompt.to_string(),
                    secondary_image,
                    mask,
                },
            )
            .await
            .map_err(map_fallback_error)?;

        let backend_used = success.backend_used;
        let variant_ids = self
            .persist_batch(job, submission, success.result.images, backend_used, prompt, 1)
            .await?;

        Ok(PipelineOutput {
            variant_ids,
            backend_used,
            chain: success.chain,
        })
    }

    /// Two-step path: step 1 produces an intermediate, step 2 produces the
    /// final variant set. Step 1's output never becomes a variant.
    async fn run_two_step(
        &self,
        job: &Job,
        submission: &Submission,
        primary_prompt: &str,
        secondary_prompt: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let source = self.load_source(submission).await?;

        let step_one = self
            .execute_process(
                submission,
                source,
                ProcessOptions {
                    prompt: primary_prompt.to_string(),
                    secondary_image: None,
                    mask: None,
                },
            )
            .await
            .map_err(|e| match e {
                FallbackError::NoBackendsAvailable => PipelineError::NoBackendsAvailable,
                FallbackError::Exhausted { last_error, .. } => {
                    PipelineError::StepOneFailed(last_error)
                }
            })?;

        let intermediate = step_one
            .result
            .images
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::StepOneFailed("backend returned no image".to_string()))?;
        let intermediate = ImageData {
            bytes: intermediate.bytes,
            mime: intermediate.mime,
        };

        // Intermediate durability is best-effort: the bytes stay in memory
        // for step 2 either way.
        if let Err(e) = self.images.persist_temp(&intermediate).await {
            warn!(job_id = %job.id, error = %e, "failed to persist intermediate result");
        }

        let secondary_image = match submission.second_image_id.as_deref() {
            Some(_) => Some(self.load_second(submission).await?),
            None => None,
        };

        let step_two = self
            .execute_process(
                submission,
                intermediate,
                ProcessOptions {
                    prompt: secondary_prompt.to_string(),
                    secondary_image,
                    mask: None,
                },
            )
            .await
            .map_err(|e| match e {
                FallbackError::NoBackendsAvailable => PipelineError::NoBackendsAvailable,
                FallbackError::Exhausted { last_error, .. } => {
                    PipelineError::StepTwoFailed(last_error)
                }
            })?;

        let backend_used = step_two.backend_used;
        let variant_ids = self
            .persist_batch(
                job,
                submission,
                step_two.result.images,
                backend_used,
                secondary_prompt,
                2,
            )
            .await?;

        let mut chain = step_one.chain;
        chain.extend(step_two.chain);

        Ok(PipelineOutput {
            variant_ids,
            backend_used,
            chain,
        })
    }

    /// Standalone generation path for export jobs.
    async fn run_generate(
        &self,
        job: &Job,
        submission: &Submission,
        prompt: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let options = Arc::new(GenerateOptions {
            prompt: prompt.to_string(),
            style: None,
            size: None,
        });

        let success = self
            .executor
            .execute(
                submission.task,
                submission.preferred_backend,
                self.max_retries_per_backend,
                move |client| {
                    let options = options.clone();
                    async move { client.generate(&options).await }
                },
            )
            .await
            .map_err(map_fallback_error)?;

        let backend_used = success.backend_used;
        let variant_ids = self
            .persist_batch(job, submission, vec![success.result], backend_used, prompt, 1)
            .await?;

        Ok(PipelineOutput {
            variant_ids,
            backend_used,
            chain: success.chain,
        })
    }

    async fn execute_process(
        &self,
        submission: &Submission,
        image: ImageData,
        options: ProcessOptions,
    ) -> Result<FallbackSuccess<ProcessOutput>, FallbackError> {
        let image = Arc::new(image);
        let options = Arc::new(options);

        self.executor
            .execute(
                submission.task,
                submission.preferred_backend,
                self.max_retries_per_backend,
                move |client| {
                    let image = image.clone();
                    let options = options.clone();
                    async move { client.process(&image, &options).await }
                },
            )
            .await
    }

    async fn load_source(&self, submission: &Submission) -> Result<ImageData, PipelineError> {
        let id = submission
            .image_id
            .as_deref()
            .ok_or_else(|| PipelineError::SourceImage("no source image on submission".to_string()))?;
        self.images
            .load_image(id)
            .await
            .map_err(|e| PipelineError::SourceImage(e.to_string()))
    }

    async fn load_second(&self, submission: &Submission) -> Result<ImageData, PipelineError> {
        let id = submission.second_image_id.as_deref().ok_or_else(|| {
            PipelineError::SourceImage("no second image on submission".to_string())
        })?;
        self.images
            .load_image(id)
            .await
            .map_err(|e| PipelineError::SourceImage(e.to_string()))
    }

    /// Persist a batch of produced images as scored variants.
    ///
    /// Individual persistence failures are skipped; an empty surviving batch
    /// is an error so the job never completes with nothing to show.
    async fn persist_batch(
        &self,
        job: &Job,
        submission: &Submission,
        images: Vec<ProducedImage>,
        backend: BackendId,
        prompt: &str,
        step: u32,
    ) -> Result<Vec<String>, PipelineError> {
        let mut variant_ids = Vec::new();

        for (index, produced) in images.into_iter().enumerate() {
            let data = ImageData {
                bytes: produced.bytes,
                mime: produced.mime,
            };

            let image_ref = match self.images.persist_image(&data).await {
                Ok(image_ref) => image_ref,
                Err(e) => {
                    warn!(job_id = %job.id, index, error = %e, "skipping variant, image persistence failed");
                    continue;
                }
            };

            let score = variant_score(index, submission.prompt.is_some(), submission.prior_edit);
            let metadata = json!({
                "backend": backend.to_string(),
                "prompt": prompt,
                "step": step,
                "backend_metadata": produced.metadata,
            });

            match self
                .images
                .create_variant(NewVariant {
                    job_id: job.id.clone(),
                    image_id: image_ref.id,
                    score,
                    metadata,
                })
                .await
            {
                Ok(record) => {
                    debug!(job_id = %job.id, variant_id = %record.id, score, "variant persisted");
                    variant_ids.push(record.id);
                }
                Err(e) => {
                    warn!(job_id = %job.id, index, error = %e, "skipping variant, row creation failed");
                }
            }
        }

        if variant_ids.is_empty() {
            return Err(PipelineError::NoVariantsProduced);
        }
        Ok(variant_ids)
    }
}

fn map_fallback_error(e: FallbackError) -> PipelineError {
    match e {
        FallbackError::NoBackendsAvailable => PipelineError::NoBackendsAvailable,
        FallbackError::Exhausted { last_error, .. } => PipelineError::Exhausted(last_error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendClient, BackendError};
    use crate::catalog::{
        BackendDescriptor, Capability, CostTier, ModelCapabilityCatalog,
    };
    use crate::imagestore::{ImageRef, ImageStoreError, InMemoryImageStore, VariantRecord};
    use crate::prompt::TemplatePromptBuilder;
    use crate::provider::{
        ActiveConfiguration, BackendSettings, ConfigCache, StaticConfigurationProvider,
    };
    use crate::registry::BackendRegistry;
    use crate::retry::BackoffPolicy;
    use crate::selector::ModelSelector;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// What a scripted test backend does per `process` call, in call order.
    #[derive(Debug, Clone, Copy)]
    enum Step {
        Produce(usize),
        Transient,
    }

    struct ScriptedClient {
        id: BackendId,
        script: Vec<Step>,
        calls: AtomicU32,
        last_options: Mutex<Option<ProcessOptions>>,
    }

    impl ScriptedClient {
        fn new(id: BackendId, script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                id,
                script,
                calls: AtomicU32::new(0),
                last_options: Mutex::new(None),
            })
        }

        fn produced(count: usize) -> Vec<ProducedImage> {
            (0..count)
                .map(|i| ProducedImage {
                    bytes: vec![i as u8; 4],
                    mime: "image/png".to_string(),
                    metadata: json!({"index": i}),
                })
                .collect()
        }
    }

    #[async_trait]
    impl BackendClient for ScriptedClient {
        fn id(&self) -> BackendId {
            self.id
        }

        fn describe(&self) -> BackendDescriptor {
            BackendDescriptor {
                id: self.id,
                quality: 7,
                speed: 7,
                cost: CostTier::Standard,
                capabilities: vec![Capability::Edit, Capability::Generate],
            }
        }

        async fn process(
            &self,
            _image: &ImageData,
            options: &ProcessOptions,
        ) -> Result<ProcessOutput, BackendError> {
            *self.last_options.lock().unwrap() = Some(options.clone());
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let step = self.script.get(call).copied().unwrap_or(Step::Transient);
            match step {
                Step::Produce(count) => Ok(ProcessOutput {
                    images: Self::produced(count),
                }),
                Step::Transient => Err(BackendError::Timeout(1)),
            }
        }

        async fn generate(
            &self,
            _options: &GenerateOptions,
        ) -> Result<ProducedImage, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.script.get(call).copied().unwrap_or(Step::Transient) {
                Step::Produce(_) => Ok(ProducedImage {
                    bytes: vec![42],
                    mime: "image/png".to_string(),
                    metadata: json!({}),
                }),
                Step::Transient => Err(BackendError::Timeout(1)),
            }
        }

        async fn test_connection(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn catalog() -> ModelCapabilityCatalog {
        ModelCapabilityCatalog::new(vec![BackendDescriptor {
            id: BackendId::Sdxl,
            quality: 7,
            speed: 7,
            cost: CostTier::Standard,
            capabilities: vec![Capability::Edit, Capability::Generate],
        }])
    }

    fn pipeline_over(
        clients: Vec<Arc<ScriptedClient>>,
        images: Arc<dyn ImageVariantStore>,
    ) -> ProcessingPipeline {
        let backends: BTreeMap<BackendId, BackendSettings> = clients
            .iter()
            .map(|c| {
                (
                    c.id(),
                    BackendSettings {
                        enabled: true,
                        model: Some("m".to_string()),
                        api_key: None,
                        base_url: None,
                        timeout_secs: 30,
                    },
                )
            })
            .collect();
        let provider = Arc::new(StaticConfigurationProvider::new(Some(
            ActiveConfiguration { backends },
        )));
        let cache = Arc::new(ConfigCache::new(provider, 60_000));

        let by_id: HashMap<BackendId, Arc<ScriptedClient>> =
            clients.into_iter().map(|c| (c.id(), c)).collect();
        let registry = Arc::new(BackendRegistry::new(
            cache,
            Box::new(move |id, _| {
                let client: Arc<dyn BackendClient> =
                    by_id.get(&id).expect("scripted client").clone();
                client
            }),
        ));

        let selector = Arc::new(ModelSelector::new(catalog(), registry.clone()));
        let executor = Arc::new(FallbackExecutor::new(
            selector,
            registry,
            BackoffPolicy::new(1, 10),
        ));
        ProcessingPipeline::new(executor, Arc::new(TemplatePromptBuilder), images, 1)
    }

    async fn seeded_store() -> Arc<InMemoryImageStore> {
        let store = Arc::new(InMemoryImageStore::new());
        store
            .insert_image("src-1", ImageData::png(vec![1, 1, 1]))
            .await;
        store
            .insert_image("src-2", ImageData::png(vec![2, 2, 2]))
            .await;
        store
    }

    fn edit_submission() -> Submission {
        let mut s = Submission::new(TaskType::Edit);
        s.image_id = Some("src-1".to_string());
        s.prompt = Some("stormy sky".to_string());
        s
    }

    #[tokio::test]
    async fn test_single_step_persists_scored_variants() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Produce(2)]);
        let pipeline = pipeline_over(vec![client], store.clone());

        let job = Job::new(TaskType::Edit);
        let submission = edit_submission();
        let output = pipeline
            .run(&job, &submission, &ProcessingMode::SingleStep)
            .await
            .unwrap();

        assert_eq!(output.variant_ids.len(), 2);
        assert_eq!(output.backend_used, BackendId::Sdxl);

        let variants: Vec<VariantRecord> = store.variants_for_job(&job.id).await;
        assert_eq!(variants.len(), 2);
        for v in &variants {
            assert!(v.score >= 0.1 && v.score <= 1.0);
            assert_eq!(v.metadata["backend"], "sdxl");
            assert_eq!(v.metadata["step"], 1);
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_error() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Produce(0)]);
        let pipeline = pipeline_over(vec![client], store);

        let job = Job::new(TaskType::Edit);
        let err = pipeline
            .run(&job, &edit_submission(), &ProcessingMode::SingleStep)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::NoVariantsProduced));
    }

    #[tokio::test]
    async fn test_exhausted_backends_surface_last_error() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Transient]);
        let pipeline = pipeline_over(vec![client], store);

        let job = Job::new(TaskType::Edit);
        let err = pipeline
            .run(&job, &edit_submission(), &ProcessingMode::SingleStep)
            .await
            .unwrap_err();

        match err {
            PipelineError::Exhausted(message) => assert!(message.contains("timed out")),
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_source_image_fails_before_backend_call() {
        let store = Arc::new(InMemoryImageStore::new());
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Produce(1)]);
        let pipeline = pipeline_over(vec![client.clone()], store);

        let job = Job::new(TaskType::Edit);
        let err = pipeline
            .run(&job, &edit_submission(), &ProcessingMode::SingleStep)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SourceImage(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dual_image_passes_second_image() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Produce(1)]);
        let pipeline = pipeline_over(vec![client.clone()], store);

        let job = Job::new(TaskType::Edit);
        let mut submission = edit_submission();
        submission.second_image_id = Some("src-2".to_string());

        pipeline
            .run(&job, &submission, &ProcessingMode::DualImage)
            .await
            .unwrap();

        let options = client.last_options.lock().unwrap().clone().unwrap();
        let secondary = options.secondary_image.expect("second image forwarded");
        assert_eq!(secondary.bytes, vec![2, 2, 2]);
    }

    #[tokio::test]
    async fn test_masked_passes_mask_untouched() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Produce(1)]);
        let pipeline = pipeline_over(vec![client.clone()], store);

        let job = Job::new(TaskType::Edit);
        let mut submission = edit_submission();
        submission.mask = Some(vec![0xde, 0xad]);

        pipeline
            .run(&job, &submission, &ProcessingMode::Masked)
            .await
            .unwrap();

        let options = client.last_options.lock().unwrap().clone().unwrap();
        assert_eq!(options.mask.as_deref(), Some(&[0xde, 0xad][..]));
    }

    #[tokio::test]
    async fn test_two_step_only_final_output_becomes_variants() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(
            BackendId::Sdxl,
            vec![Step::Produce(1), Step::Produce(2)],
        );
        let pipeline = pipeline_over(vec![client.clone()], store.clone());

        let job = Job::new(TaskType::Edit);
        let submission = edit_submission();
        let mode = ProcessingMode::TwoStep {
            secondary_prompt: "recolor in watercolor".to_string(),
        };

        let output = pipeline.run(&job, &submission, &mode).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        // Only the two step-2 images became variants.
        assert_eq!(output.variant_ids.len(), 2);
        let variants = store.variants_for_job(&job.id).await;
        assert!(variants.iter().all(|v| v.metadata["step"] == 2));
        // The intermediate landed in temporary storage.
        assert_eq!(store.temp_count().await, 1);
        // The chain spans both steps.
        assert_eq!(output.chain.len(), 2);
    }

    #[tokio::test]
    async fn test_two_step_step_one_failure() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Transient]);
        let pipeline = pipeline_over(vec![client], store.clone());

        let job = Job::new(TaskType::Edit);
        let mode = ProcessingMode::TwoStep {
            secondary_prompt: "recolor".to_string(),
        };
        let err = pipeline.run(&job, &edit_submission(), &mode).await.unwrap_err();

        assert!(matches!(err, PipelineError::StepOneFailed(_)));
        assert!(err.to_string().starts_with("Step 1 failed:"));
        assert!(store.variants_for_job(&job.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_two_step_step_two_failure_creates_no_variants() {
        let store = seeded_store().await;
        let client = ScriptedClient::new(
            BackendId::Sdxl,
            vec![Step::Produce(1), Step::Transient],
        );
        let pipeline = pipeline_over(vec![client], store.clone());

        let job = Job::new(TaskType::Edit);
        let mode = ProcessingMode::TwoStep {
            secondary_prompt: "recolor".to_string(),
        };
        let err = pipeline.run(&job, &edit_submission(), &mode).await.unwrap_err();

        assert!(matches!(err, PipelineError::StepTwoFailed(_)));
        assert!(err.to_string().starts_with("Step 2 failed:"));
        // Step 1's intermediate output never becomes a variant.
        assert!(store.variants_for_job(&job.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_export_uses_generation() {
        let store = Arc::new(InMemoryImageStore::new());
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Produce(1)]);
        let pipeline = pipeline_over(vec![client], store.clone());

        let job = Job::new(TaskType::Export);
        let submission = Submission::new(TaskType::Export);

        let output = pipeline
            .run(&job, &submission, &ProcessingMode::SingleStep)
            .await
            .unwrap();

        assert_eq!(output.variant_ids.len(), 1);
        assert_eq!(store.variants_for_job(&job.id).await.len(), 1);
    }

    /// Store that fails the first variant-row creation, then recovers.
    struct FlakyVariantStore {
        inner: Arc<InMemoryImageStore>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl ImageVariantStore for FlakyVariantStore {
        async fn load_image(&self, id: &str) -> Result<ImageData, ImageStoreError> {
            self.inner.load_image(id).await
        }

        async fn persist_image(&self, image: &ImageData) -> Result<ImageRef, ImageStoreError> {
            self.inner.persist_image(image).await
        }

        async fn persist_temp(&self, image: &ImageData) -> Result<String, ImageStoreError> {
            self.inner.persist_temp(image).await
        }

        async fn create_variant(
            &self,
            variant: NewVariant,
        ) -> Result<VariantRecord, ImageStoreError> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err(ImageStoreError::Serde("variant row rejected".to_string()));
            }
            self.inner.create_variant(variant).await
        }

        async fn get_variant(&self, id: &str) -> Result<Option<VariantRecord>, ImageStoreError> {
            self.inner.get_variant(id).await
        }
    }

    #[tokio::test]
    async fn test_variant_persistence_failure_is_skipped() {
        let inner = seeded_store().await;
        let store = Arc::new(FlakyVariantStore {
            inner: inner.clone(),
            failures_left: AtomicU32::new(1),
        });
        let client = ScriptedClient::new(BackendId::Sdxl, vec![Step::Produce(3)]);
        let pipeline = pipeline_over(vec![client], store);

        let job = Job::new(TaskType::Edit);
        let output = pipeline
            .run(&job, &edit_submission(), &ProcessingMode::SingleStep)
            .await
            .unwrap();

        // One of three variants was dropped; the batch still succeeds.
        assert_eq!(output.variant_ids.len(), 2);
        assert_eq!(inner.variants_for_job(&job.id).await.len(), 2);
    }
}
