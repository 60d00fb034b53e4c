//! Uniform client interface for external AI image backends.
//!
//! Every backend is reachable through [`BackendClient`] regardless of its
//! actual wire protocol. Errors carry an HTTP-like status where one exists so
//! the fallback layer can detect rate limiting without knowing the transport.

use crate::catalog::{BackendDescriptor, BackendId};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Raw image payload handed to a backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    /// MIME type, e.g. "image/png".
    pub mime: String,
}

impl ImageData {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: "image/png".to_string(),
        }
    }
}

/// Options for a transformation call against an existing image.
///
/// The model name is not part of the call: each client is constructed with
/// the model from the active configuration.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Backend-ready prompt text.
    pub prompt: String,
    /// Second input image for dual-image capabilities.
    pub secondary_image: Option<ImageData>,
    /// Mask bytes for masked editing; passed through untouched.
    pub mask: Option<Vec<u8>>,
}

/// Options for standalone generation.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub prompt: String,
    pub style: Option<String>,
    /// Requested output dimensions, if the caller cares.
    pub size: Option<(u32, u32)>,
}

/// One image produced by a backend call, with whatever metadata the backend
/// attached (seed, revised prompt, safety annotations...).
#[derive(Debug, Clone)]
pub struct ProducedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub metadata: Value,
}

/// Result of a transformation call: one or more candidate images.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub images: Vec<ProducedImage>,
}

/// Structured failure from a backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend explicitly signalled rate limiting (HTTP 429 or equivalent).
    #[error("rate limited (status {status})")]
    RateLimited {
        status: u16,
        /// Backend-provided wait hint, when present.
        retry_after_ms: Option<u64>,
    },

    /// Credentials were rejected. Never retried against the same backend.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The outbound call exceeded its configured timeout.
    #[error("backend call timed out after {0}s")]
    Timeout(u64),

    /// The backend answered, but the response could not be interpreted.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// The backend is temporarily unable to serve the request.
    #[error("backend unavailable: {message}")]
    Unavailable { status: Option<u16>, message: String },

    /// Connection-level failure before any response arrived.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Substrings that mark an otherwise-unclassified error as rate limiting.
const RATE_LIMIT_KEYWORDS: &[&str] = &["rate limit", "too many requests", "quota exceeded"];

impl BackendError {
    /// Map an HTTP-like status code to the matching error variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => BackendError::RateLimited {
                status,
                retry_after_ms: None,
            },
            401 | 403 => BackendError::Auth(message),
            _ => BackendError::Unavailable {
                status: Some(status),
                message,
            },
        }
    }

    /// HTTP-like status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::RateLimited { status, .. } => Some(*status),
            BackendError::Unavailable { status, .. } => *status,
            _ => None,
        }
    }

    /// Transport-agnostic rate-limit predicate: either the explicit variant,
    /// or a recognizable keyword in an unclassified message.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            BackendError::RateLimited { .. } => true,
            BackendError::Unavailable { message, .. } | BackendError::Transport(message) => {
                let lower = message.to_lowercase();
                RATE_LIMIT_KEYWORDS.iter().any(|kw| lower.contains(kw))
            }
            _ => false,
        }
    }

    /// Fatal errors abort all remaining retries for the backend that produced
    /// them; the fallback chain still proceeds to the next backend.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Auth(_))
    }
}

/// Uniform interface to one external AI image-processing backend.
///
/// All operations are asynchronous; implementations own their transport,
/// credentials, and per-call timeout.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// The backend this client talks to.
    fn id(&self) -> BackendId;

    /// Catalog metadata for this backend.
    fn describe(&self) -> BackendDescriptor;

    /// Transform an existing image into one or more candidate outputs.
    async fn process(
        &self,
        image: &ImageData,
        options: &ProcessOptions,
    ) -> Result<ProcessOutput, BackendError>;

    /// Generate a standalone image from a prompt.
    async fn generate(&self, options: &GenerateOptions) -> Result<ProducedImage, BackendError>;

    /// Cheap reachability check used by startup preflight.
    async fn test_connection(&self) -> Result<(), BackendError>;
}
