//! Static relay configuration
//!
//! Every value is fixed at startup. Configuration comes from an optional YAML
//! file; missing keys take their defaults:
//!
//! ```yaml
//! source:
//!   input: traffic.mp4
//!   fps: 5
//! delivery:
//!   release_interval_ms: 200
//! detection:
//!   endpoint: http://localhost:8000/detect
//!   min_interval_ms: 1000
//!   timeout_ms: 5000
//! viewer:
//!   port: 8080
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::{RelayError, Result};

/// Top-level relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub source: SourceConfig,
    pub delivery: DeliveryConfig,
    pub detection: DetectionConfig,
    pub viewer: ViewerConfig,
}

/// Where the MJPEG byte stream comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Video/input source identifier handed to the decoder
    pub input: String,
    /// Decoder executable
    pub decoder_program: String,
    /// Restart the input from the beginning when it ends
    pub loop_input: bool,
    /// Decoder output frame rate
    pub fps: u32,
    /// MJPEG quality scale (lower is better)
    pub quality: u32,
    /// Treat `input` as a recorded MJPEG byte file instead of spawning the decoder
    pub replay: bool,
    /// Initial capacity of the read buffer; reads may grow past it
    pub read_chunk_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input: "sample2.mp4".to_string(),
            decoder_program: "ffmpeg".to_string(),
            loop_input: true,
            fps: 5,
            quality: 5,
            replay: false,
            read_chunk_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Fixed gap between two frame releases
    pub release_interval_ms: u64,
    /// Warn each time the backlog grows past another multiple of this depth
    pub backlog_warn_threshold: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { release_interval_ms: 200, backlog_warn_threshold: 50 }
    }
}

impl DeliveryConfig {
    pub fn release_interval(&self) -> Duration {
        Duration::from_millis(self.release_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    /// Detection backend URL accepting multipart JPEG uploads
    pub endpoint: String,
    /// Throttle window between the starts of two detection calls
    pub min_interval_ms: u64,
    /// Per-call timeout
    pub timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:8000/detect".to_string(),
            min_interval_ms: 1000,
            timeout_ms: 5000,
        }
    }
}

impl DetectionConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub bind: String,
    pub port: u16,
    /// Outbound messages a viewer may have queued before it counts as not ready
    pub outbound_buffer: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".to_string(), port: 8080, outbound_buffer: 16 }
    }
}

impl ViewerConfig {
    /// Listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse()
            .map_err(|e| RelayError::config_error("viewer.bind", format!("{addr}: {e}")))
    }
}

impl RelayConfig {
    /// Load configuration from a YAML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::file_error(path.to_path_buf(), e))?;
        let config = Self::from_yaml(&text).map_err(|e| match e {
            RelayError::Config { context, details } => {
                RelayError::config_error(format!("{} ({context})", path.display()), details)
            }
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: RelayConfig = if text.trim().is_empty() {
            RelayConfig::default()
        } else {
            serde_yaml_ng::from_str(text)
                .map_err(|e| RelayError::config_error("yaml", e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.source.input.is_empty() {
            return Err(RelayError::config_error("source.input", "must not be empty"));
        }
        if self.source.read_chunk_size == 0 {
            return Err(RelayError::config_error("source.read_chunk_size", "must be > 0"));
        }
        if self.source.fps == 0 {
            return Err(RelayError::config_error("source.fps", "must be > 0"));
        }
        if self.delivery.release_interval_ms == 0 {
            return Err(RelayError::config_error("delivery.release_interval_ms", "must be > 0"));
        }
        if self.detection.enabled {
            if self.detection.endpoint.is_empty() {
                return Err(RelayError::config_error("detection.endpoint", "must not be empty"));
            }
            if self.detection.timeout_ms == 0 {
                return Err(RelayError::config_error("detection.timeout_ms", "must be > 0"));
            }
        }
        if self.viewer.outbound_buffer == 0 {
            return Err(RelayError::config_error("viewer.outbound_buffer", "must be > 0"));
        }
        self.viewer.socket_addr()?;
        Ok(())
    }
}
