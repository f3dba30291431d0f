//! STEP to GLB conversion.
//!
//! CAD uploads are handed to an external conversion service. The service is
//! optional; without one every STEP upload fails with a conversion error and
//! nothing is stored.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::error::{Result, ServerError};

/// First four bytes of every binary glTF container
pub const GLB_MAGIC: &[u8; 4] = b"glTF";

const CONVERT_TIMEOUT_SECS: u64 = 300;

#[async_trait]
pub trait StepConverter: Send + Sync {
    /// Convert STEP bytes into GLB bytes
    async fn convert(&self, step: Bytes, file_name: &str) -> Result<Bytes>;
}

/// Used when no conversion service is configured
pub struct DisabledConverter;

#[async_trait]
impl StepConverter for DisabledConverter {
    async fn convert(&self, _step: Bytes, file_name: &str) -> Result<Bytes> {
        Err(ServerError::Conversion(format!(
            "no converter configured for {}",
            file_name
        )))
    }
}

/// Posts the raw STEP payload and expects GLB bytes back
pub struct HttpStepConverter {
    url: String,
    client: Client,
}

impl HttpStepConverter {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CONVERT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ServerError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl StepConverter for HttpStepConverter {
    async fn convert(&self, step: Bytes, file_name: &str) -> Result<Bytes> {
        tracing::info!("Converting {} ({} bytes) via {}", file_name, step.len(), self.url);

        let response = self
            .client
            .post(&self.url)
            .query(&[("filename", file_name)])
            .header(reqwest::header::CONTENT_TYPE, "application/step")
            .body(step)
            .send()
            .await
            .map_err(|e| ServerError::Conversion(format!("converter request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ServerError::Conversion(format!(
                "converter returned {}: {}",
                status,
                detail.trim()
            )));
        }

        let glb = response
            .bytes()
            .await
            .map_err(|e| ServerError::Conversion(format!("converter response: {}", e)))?;
        check_glb(&glb)?;
        Ok(glb)
    }
}

/// Reject output that is not a binary glTF container
pub fn check_glb(bytes: &[u8]) -> Result<()> {
    if bytes.len() < GLB_MAGIC.len() || &bytes[..GLB_MAGIC.len()] != GLB_MAGIC {
        return Err(ServerError::Conversion(
            "converter output is not a GLB file".to_string(),
        ));
    }
    Ok(())
}
