//! HTTP detection backend
//!
//! Frames are POSTed as a multipart upload with a single `file` field
//! (`frame.jpg`, `image/jpeg`). The backend answers with
//! `{"boxes": [...], "labels": [...], "scores": [...]}`.

use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::trace;

use super::DetectionBackend;
use crate::config::DetectionConfig;
use crate::types::DetectionResult;
use crate::{RelayError, Result};

const FIELD_NAME: &str = "file";
const FILE_NAME: &str = "frame.jpg";
const CONTENT_TYPE: &str = "image/jpeg";

/// Detection backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpDetectionBackend {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpDetectionBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            RelayError::detection_failed_with_source("failed to build HTTP client", Box::new(e))
        })?;
        Ok(Self { client, endpoint: endpoint.into(), timeout })
    }

    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.timeout())
    }

    fn transport_error(&self, error: reqwest::Error) -> RelayError {
        if error.is_timeout() {
            RelayError::Timeout { duration: self.timeout }
        } else {
            RelayError::detection_failed_with_source(
                format!("POST {} failed", self.endpoint),
                Box::new(error),
            )
        }
    }
}

#[async_trait::async_trait]
impl DetectionBackend for HttpDetectionBackend {
    async fn detect(&self, jpeg: Bytes) -> Result<DetectionResult> {
        let size = jpeg.len();
        let part = Part::bytes(jpeg.to_vec())
            .file_name(FILE_NAME)
            .mime_str(CONTENT_TYPE)
            .map_err(|e| self.transport_error(e))?;
        let form = Form::new().part(FIELD_NAME, part);

        trace!(bytes = size, "Uploading frame to {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::DetectionStatus { status: status.as_u16() });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&body)
            .map_err(|e| RelayError::malformed_detection(format!("invalid JSON body: {e}")))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
