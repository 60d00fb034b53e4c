//! Submission types and pre-flight validation gates.
//!
//! A submission is checked before any job row is created: features that
//! require a second image or mask data are rejected up front with a
//! validation error, never as a job-level failure. The feature's declared
//! processing options are resolved once into a tagged [`ProcessingMode`]
//! instead of being re-inspected at each pipeline stage.

use crate::catalog::{BackendId, TaskType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw processing options as a feature declares them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessingOptions {
    /// Run a two-step flow (e.g. sketch, then recolor).
    #[serde(default)]
    pub two_step: bool,
    /// Prompt for the second step of a two-step flow.
    #[serde(default)]
    pub secondary_prompt: Option<String>,
    /// The capability needs a second input image.
    #[serde(default)]
    pub requires_second_image: bool,
    /// The capability needs mask data.
    #[serde(default)]
    pub requires_mask: bool,
}

/// Resolved processing mode, selected once per submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProcessingMode {
    SingleStep,
    TwoStep { secondary_prompt: String },
    DualImage,
    Masked,
}

impl ProcessingOptions {
    /// Collapse the declared options into one mode. Two-step wins over the
    /// input-shape flags; the pipeline still passes a second image through
    /// to step 2 when the submission carries one.
    pub fn resolve(&self) -> Result<ProcessingMode, ValidationError> {
        if self.two_step {
            let secondary_prompt = self
                .secondary_prompt
                .clone()
                .ok_or(ValidationError::MissingSecondaryPrompt)?;
            return Ok(ProcessingMode::TwoStep { secondary_prompt });
        }
        if self.requires_second_image {
            return Ok(ProcessingMode::DualImage);
        }
        if self.requires_mask {
            return Ok(ProcessingMode::Masked);
        }
        Ok(ProcessingMode::SingleStep)
    }
}

/// One client request for processed image variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub task: TaskType,
    /// Primary stored-image reference. Required for everything but export.
    pub image_id: Option<String>,
    /// Second stored-image reference for dual-image capabilities.
    pub second_image_id: Option<String>,
    /// Mask bytes for masked editing; passed through to the backend untouched.
    #[serde(default)]
    pub mask: Option<Vec<u8>>,
    /// User-supplied prompt text.
    pub prompt: Option<String>,
    /// Feature key that produced this submission.
    pub feature: Option<String>,
    #[serde(default)]
    pub options: ProcessingOptions,
    /// Backend the user explicitly asked for.
    pub preferred_backend: Option<BackendId>,
    /// Client-supplied deduplication token.
    pub idempotency_key: Option<String>,
    pub session_id: Option<String>,
    /// The submission continues a prior editing context.
    #[serde(default)]
    pub prior_edit: bool,
}

impl Submission {
    /// Minimal submission for a task; tests and callers fill in the rest.
    pub fn new(task: TaskType) -> Self {
        Self {
            task,
            image_id: None,
            second_image_id: None,
            mask: None,
            prompt: None,
            feature: None,
            options: ProcessingOptions::default(),
            preferred_backend: None,
            idempotency_key: None,
            session_id: None,
            prior_edit: false,
        }
    }
}

/// Error type for submission validation
///
/// These are rejected before any processing starts and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a source image is required for {0} jobs")]
    MissingSourceImage(TaskType),

    #[error("this feature requires a second image")]
    MissingSecondImage,

    #[error("this feature requires mask data")]
    MissingMask,

    #[error("two-step feature declares no secondary prompt")]
    MissingSecondaryPrompt,
}

/// Validate a submission and resolve its processing mode.
///
/// Runs before any side effect: a failing gate means no job row exists.
pub fn validate(submission: &Submission) -> Result<ProcessingMode, ValidationError> {
    let mode = submission.options.resolve()?;

    if submission.task != TaskType::Export && submission.image_id.is_none() {
        return Err(ValidationError::MissingSourceImage(submission.task));
    }

    match &mode {
        ProcessingMode::DualImage if submission.second_image_id.is_none() => {
            Err(ValidationError::MissingSecondImage)
        }
        ProcessingMode::Masked
            if submission
                .mask
                .as_ref()
                .map(|m| m.is_empty())
                .unwrap_or(true) =>
        {
            Err(ValidationError::MissingMask)
        }
        _ => Ok(mode),
    }
}
