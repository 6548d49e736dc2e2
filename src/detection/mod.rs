//! Detection side-channel
//!
//! A throttled subset of released frames is uploaded to an object-detection backend.
//! Results are broadcast to viewers as tagged text messages. Nothing here ever
//! blocks or backs up the frame stream.

mod http;
mod sampler;

pub use http::HttpDetectionBackend;
pub use sampler::{DetectionCounts, DetectionSampler};

use bytes::Bytes;

use crate::Result;
use crate::types::DetectionResult;

/// Request/response access to an object-detection service
#[async_trait::async_trait]
pub trait DetectionBackend: Send + Sync + 'static {
    /// Run detection on one encoded JPEG image
    async fn detect(&self, jpeg: Bytes) -> Result<DetectionResult>;

    /// Where requests go, for logging
    fn endpoint(&self) -> String;
}
