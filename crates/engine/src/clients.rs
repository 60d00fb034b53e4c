//! Generic HTTP adapter for backend gateways.
//!
//! Speaks a uniform JSON protocol to whatever base URL a backend is
//! configured with: images travel base64-encoded, errors map from HTTP
//! status codes. Vendor-specific wire formats live behind the gateway, not
//! here. One client is built per backend from its active settings and owns
//! its transport, credentials, model name, and per-call timeout.

use crate::backend::{
    BackendClient, BackendError, GenerateOptions, ImageData, ProcessOptions, ProcessOutput,
    ProducedImage,
};
use crate::catalog::{BackendDescriptor, BackendId, CostTier, ModelCapabilityCatalog};
use crate::provider::BackendSettings;
use crate::registry::ClientFactory;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ProcessBody {
    model: String,
    prompt: String,
    image: String,
    mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secondary_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secondary_mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateBody {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

fn default_wire_mime() -> String {
    "image/png".to_string()
}

#[derive(Debug, Deserialize)]
struct WireImage {
    data: String,
    #[serde(default = "default_wire_mime")]
    mime: String,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    images: Vec<WireImage>,
}

fn encode_process_body(model: &str, image: &ImageData, options: &ProcessOptions) -> ProcessBody {
    ProcessBody {
        model: model.to_string(),
        prompt: options.prompt.clone(),
        image: BASE64.encode(&image.bytes),
        mime: image.mime.clone(),
        secondary_image: options
            .secondary_image
            .as_ref()
            .map(|img| BASE64.encode(&img.bytes)),
        secondary_mime: options.secondary_image.as_ref().map(|img| img.mime.clone()),
        mask: options.mask.as_ref().map(|m| BASE64.encode(m)),
    }
}

fn decode_wire_image(wire: WireImage) -> Result<ProducedImage, BackendError> {
    let bytes = BASE64
        .decode(wire.data.as_bytes())
        .map_err(|e| BackendError::MalformedResponse(format!("image payload: {}", e)))?;
    Ok(ProducedImage {
        bytes,
        mime: wire.mime,
        metadata: wire.metadata,
    })
}

/// HTTP client for one configured backend.
pub struct HttpBackendClient {
    id: BackendId,
    descriptor: BackendDescriptor,
    http: reqwest::Client,
    base_url: Option<String>,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpBackendClient {
    pub fn from_settings(
        id: BackendId,
        settings: &BackendSettings,
        catalog: &ModelCapabilityCatalog,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_default();

        let descriptor = catalog
            .capabilities_of(id)
            .cloned()
            .unwrap_or(BackendDescriptor {
                id,
                quality: 0,
                speed: 0,
                cost: CostTier::Standard,
                capabilities: vec![],
            });

        Self {
            id,
            descriptor,
            http,
            base_url: settings.base_url.clone(),
            model: settings.model.clone().unwrap_or_default(),
            api_key: settings.api_key.clone(),
            timeout_secs: settings.timeout_secs,
        }
    }

    fn endpoint(&self, path: &str) -> Result<String, BackendError> {
        let base = self.base_url.as_deref().ok_or(BackendError::Unavailable {
            status: None,
            message: format!("backend {} has no base URL configured", self.id),
        })?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), path))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout_secs)
        } else {
            BackendError::Transport(e.to_string())
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BackendError::from_status(status.as_u16(), message))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn id(&self) -> BackendId {
        self.id
    }

    fn describe(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    async fn process(
        &self,
        image: &ImageData,
        options: &ProcessOptions,
    ) -> Result<ProcessOutput, BackendError> {
        let url = self.endpoint("process")?;
        let body = encode_process_body(&self.model, image, options);

        let response = self
            .authorize(self.http.post(url).json(&body))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let response = Self::check_status(response).await?;

        let parsed: ProcessResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        let images = parsed
            .images
            .into_iter()
            .map(decode_wire_image)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ProcessOutput { images })
    }

    async fn generate(&self, options: &GenerateOptions) -> Result<ProducedImage, BackendError> {
        let url = self.endpoint("generate")?;
        let body = GenerateBody {
            model: self.model.clone(),
            prompt: options.prompt.clone(),
            style: options.style.clone(),
            width: options.size.map(|(w, _)| w),
            height: options.size.map(|(_, h)| h),
        };

        let response = self
            .authorize(self.http.post(url).json(&body))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let response = Self::check_status(response).await?;

        let wire: WireImage = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        decode_wire_image(wire)
    }

    async fn test_connection(&self) -> Result<(), BackendError> {
        let url = self.endpoint("health")?;
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        Self::check_status(response).await.map(|_| ())
    }
}

/// Factory building one HTTP adapter client per backend.
pub fn http_client_factory(catalog: ModelCapabilityCatalog) -> ClientFactory {
    Box::new(move |id, settings| {
        Arc::new(HttpBackendClient::from_settings(id, settings, &catalog))
    })
}
