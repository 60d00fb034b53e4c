//! Image and variant persistence.
//!
//! The engine never owns image bytes: it loads sources from, and hands
//! produced bytes back to, an [`ImageVariantStore`] collaborator. Variant
//! rows only reference the stored image. The file-backed implementation
//! keeps images under `images/`, intermediate results under `tmp/`, and
//! variant rows as JSON under `variants/`. Thumbnail generation is delegated
//! to the surrounding media service; references are filled when available.

use crate::backend::ImageData;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Reference to one persisted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    /// Thumbnail reference, when the media service has produced one.
    pub thumbnail_id: Option<String>,
}

/// Variant row to be created for a job.
#[derive(Debug, Clone)]
pub struct NewVariant {
    pub job_id: String,
    pub image_id: String,
    /// Score in [0.1, 1.0].
    pub score: f32,
    /// Free-form metadata bag: backend used, prompt, step index.
    pub metadata: Value,
}

/// One persisted variant row. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub id: String,
    pub job_id: String,
    pub image_id: String,
    pub score: f32,
    pub metadata: Value,
    pub created_at: i64,
}

/// Error type for image store operations
#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("image {0} not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(String),
}

/// Persistence collaborator for image bytes and variant rows.
#[async_trait]
pub trait ImageVariantStore: Send + Sync {
    /// Load a stored image's bytes by id.
    async fn load_image(&self, id: &str) -> Result<ImageData, ImageStoreError>;

    /// Persist produced bytes as a permanent image.
    async fn persist_image(&self, image: &ImageData) -> Result<ImageRef, ImageStoreError>;

    /// Persist an intermediate result to a temporary location.
    async fn persist_temp(&self, image: &ImageData) -> Result<String, ImageStoreError>;

    /// Create a variant row, returning it with its assigned id.
    async fn create_variant(&self, variant: NewVariant) -> Result<VariantRecord, ImageStoreError>;

    /// Look up a variant row by id.
    async fn get_variant(&self, id: &str) -> Result<Option<VariantRecord>, ImageStoreError>;
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// File-backed store rooted at a data directory.
pub struct FileImageStore {
    images_dir: PathBuf,
    tmp_dir: PathBuf,
    variants_dir: PathBuf,
}

impl FileImageStore {
    /// Open the store, creating its directory layout if needed.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, ImageStoreError> {
        let data_dir = data_dir.into();
        let images_dir = data_dir.join("images");
        let tmp_dir = data_dir.join("tmp");
        let variants_dir = data_dir.join("variants");
        for dir in [&images_dir, &tmp_dir, &variants_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(Self {
            images_dir,
            tmp_dir,
            variants_dir,
        })
    }
}

#[async_trait]
impl ImageVariantStore for FileImageStore {
    async fn load_image(&self, id: &str) -> Result<ImageData, ImageStoreError> {
        let path = self.images_dir.join(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ImageStoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Ok(ImageData {
            bytes,
            mime: mime_for_extension(ext).to_string(),
        })
    }

    async fn persist_image(&self, image: &ImageData) -> Result<ImageRef, ImageStoreError> {
        let id = format!(
            "{}.{}",
            Uuid::new_v4(),
            extension_for_mime(&image.mime)
        );
        tokio::fs::write(self.images_dir.join(&id), &image.bytes).await?;
        Ok(ImageRef {
            id,
            thumbnail_id: None,
        })
    }

    async fn persist_temp(&self, image: &ImageData) -> Result<String, ImageStoreError> {
        let id = format!(
            "{}.{}",
            Uuid::new_v4(),
            extension_for_mime(&image.mime)
        );
        tokio::fs::write(self.tmp_dir.join(&id), &image.bytes).await?;
        Ok(id)
    }

    async fn create_variant(&self, variant: NewVariant) -> Result<VariantRecord, ImageStoreError> {
        let record = VariantRecord {
            id: Uuid::new_v4().to_string(),
            job_id: variant.job_id,
            image_id: variant.image_id,
            score: variant.score,
            metadata: variant.metadata,
            created_at: current_timestamp_ms(),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| ImageStoreError::Serde(e.to_string()))?;
        tokio::fs::write(self.variants_dir.join(format!("{}.json", record.id)), json).await?;
        Ok(record)
    }

    async fn get_variant(&self, id: &str) -> Result<Option<VariantRecord>, ImageStoreError> {
        let path = self.variants_dir.join(format!("{}.json", id));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ImageStoreError::Serde(e.to_string()))
    }
}

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryImageStore {
    images: RwLock<HashMap<String, ImageData>>,
    temp: RwLock<HashMap<String, ImageData>>,
    variants: RwLock<HashMap<String, VariantRecord>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a source image under a fixed id.
    pub async fn insert_image(&self, id: impl Into<String>, image: ImageData) {
        self.images.write().await.insert(id.into(), image);
    }

    /// All variant rows for a job, unordered.
    pub async fn variants_for_job(&self, job_id: &str) -> Vec<VariantRecord> {
        self.variants
            .read()
            .await
            .values()
            .filter(|v| v.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Number of intermediate results persisted.
    pub async fn temp_count(&self) -> usize {
        self.temp.read().await.len()
    }
}

#[async_trait]
impl ImageVariantStore for InMemoryImageStore {
    async fn load_image(&self, id: &str) -> Result<ImageData, ImageStoreError> {
        self.images
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ImageStoreError::NotFound(id.to_string()))
    }

    async fn persist_image(&self, image: &ImageData) -> Result<ImageRef, ImageStoreError> {
        let id = format!(
            "{}.{}",
            Uuid::new_v4(),
            extension_for_mime(&image.mime)
        );
        self.images.write().await.insert(id.clone(), image.clone());
        Ok(ImageRef {
            id,
            thumbnail_id: None,
        })
    }

    async fn persist_temp(&self, image: &ImageData) -> Result<String, ImageStoreError> {
        let id = Uuid::new_v4().to_string();
        self.temp.write().await.insert(id.clone(), image.clone());
        Ok(id)
    }

    async fn create_variant(&self, variant: NewVariant) -> Result<VariantRecord, ImageStoreError> {
        let record = VariantRecord {
            id: Uuid::new_v4().to_string(),
            job_id: variant.job_id,
            image_id: variant.image_id,
            score: variant.score,
            metadata: variant.metadata,
            created_at: current_timestamp_ms(),
        };
        self.variants
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_variant(&self, id: &str) -> Result<Option<VariantRecord>, ImageStoreError> {
        Ok(self.variants.read().await.get(id).cloned())
    }
}
