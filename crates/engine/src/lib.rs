//! pixelmill orchestration engine
//!
//! Background service that routes image-processing jobs across interchangeable
//! AI backends: backend selection, fallback-with-retry, the persisted job
//! state machine, idempotent intake, and variant production.

pub mod backend;
pub mod catalog;
pub mod clients;
pub mod engine;
pub mod fallback;
pub mod imagestore;
pub mod job;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod request;
pub mod retry;
pub mod scoring;
pub mod selector;
pub mod startup;
pub mod status_server;

pub use pixelmill_config as config;
pub use pixelmill_config::Config;

pub use backend::{
    BackendClient, BackendError, GenerateOptions, ImageData, ProcessOptions, ProcessOutput,
    ProducedImage,
};
pub use catalog::{
    BackendDescriptor, BackendId, Capability, CostTier, ModelCapabilityCatalog, TaskType,
};
pub use clients::{http_client_factory, HttpBackendClient};
pub use engine::{Engine, SubmitError};
pub use fallback::{
    AttemptOutcome, FallbackAttempt, FallbackError, FallbackExecutor, FallbackSuccess,
};
pub use imagestore::{
    FileImageStore, ImageRef, ImageStoreError, ImageVariantStore, InMemoryImageStore, NewVariant,
    VariantRecord,
};
pub use job::{
    InMemoryJobStore, Job, JobStatus, JobStore, JsonFileJobStore, StatusUpdate, StoreError,
    TransitionError,
};
pub use lifecycle::{CreateOutcome, JobLifecycleManager, LifecycleError, LifecyclePolicy};
pub use metrics::{
    collect_system_metrics, new_shared_metrics, EngineSnapshot, JobMetrics, SharedMetrics,
    SystemMetrics,
};
pub use pipeline::{PipelineError, PipelineOutput, ProcessingPipeline};
pub use prompt::{PromptBuilder, PromptRequest, TemplatePromptBuilder};
pub use provider::{
    ActiveConfiguration, BackendSettings, ConfigCache, ConfigSnapshot, ConfigurationProvider,
    FileConfigurationProvider, ProviderError, StaticConfigurationProvider,
};
pub use registry::{BackendRegistry, ClientFactory, RegistryError};
pub use request::{validate, ProcessingMode, ProcessingOptions, Submission, ValidationError};
pub use retry::BackoffPolicy;
pub use scoring::variant_score;
pub use selector::{ModelSelector, SelectError, SelectionResult};
pub use startup::{run_connectivity_checks, run_startup_checks, validate_config, StartupError};
pub use status_server::{create_status_router, run_status_server, ServerError};
