//! Error types for the relay pipeline.
//!
//! Every fallible operation in the crate returns [`RelayError`]. Most failures are local:
//! a detection call that fails is logged and dropped, a viewer that cannot accept a message
//! is skipped. Only decoder death stops the flow of new frames.
//!
//! ## Error Categories
//!
//! - **Decoder Errors**: the external decoder could not be spawned or its stream broke
//! - **File Errors**: configuration or replay files could not be read
//! - **Detection Errors**: transport failures, timeouts, bad status codes or bodies
//! - **Viewer Errors**: the viewer transport refused a message
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use framecast::RelayError;
//!
//! let error = RelayError::detection_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Decoder process failed: {reason}")]
    Decoder {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Detection request failed: {reason}")]
    Detection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Detection backend answered with status {status}")]
    DetectionStatus { status: u16 },

    #[error("Malformed detection result: {details}")]
    MalformedDetection { details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Failed to bind viewer endpoint on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Viewer {viewer} rejected message: {reason}")]
    ViewerSend { viewer: u64, reason: String },

    #[error("{component} has shut down")]
    Shutdown { component: String },
}

impl RelayError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Detection { .. } => true,
            RelayError::DetectionStatus { status } => *status >= 500,
            RelayError::Timeout { .. } => true,
            RelayError::ViewerSend { .. } => true,
            RelayError::Decoder { .. } => false,
            RelayError::File { .. } => false,
            RelayError::Config { .. } => false,
            RelayError::MalformedDetection { .. } => false,
            RelayError::Bind { .. } => false,
            RelayError::Shutdown { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::Decoder { .. } => vec![
                "Check that the decoder executable is installed and on PATH",
                "Verify the input source exists and is readable",
                "Inspect the decoder's stderr output at trace level",
            ],
            RelayError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            RelayError::Config { .. } => vec![
                "Check the YAML syntax of the configuration file",
                "Ensure intervals and timeouts are greater than zero",
            ],
            RelayError::Detection { .. } => vec![
                "Ensure the detection backend is running",
                "Verify the configured detection endpoint URL",
            ],
            RelayError::DetectionStatus { .. } => vec![
                "Check the detection backend logs",
                "Verify the backend accepts multipart JPEG uploads",
            ],
            RelayError::MalformedDetection { .. } => vec![
                "Verify the backend returns boxes, labels and scores of equal length",
                "Check backend and relay protocol compatibility",
            ],
            RelayError::Timeout { .. } => vec![
                "Increase the detection timeout",
                "Check detection backend load",
            ],
            RelayError::Bind { .. } => vec![
                "Choose a different viewer port",
                "Check whether another process is listening on the port",
            ],
            RelayError::ViewerSend { .. } => vec![
                "The viewer is slow or disconnected and will be skipped",
            ],
            RelayError::Shutdown { .. } => vec![
                "The relay is stopping; start a new relay instance",
            ],
        }
    }

    /// Helper constructor for decoder errors.
    pub fn decoder_failed(reason: impl Into<String>) -> Self {
        RelayError::Decoder { reason: reason.into(), source: None }
    }

    /// Helper constructor for decoder errors with an IO source.
    pub fn decoder_failed_with_source(reason: impl Into<String>, source: std::io::Error) -> Self {
        RelayError::Decoder { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        RelayError::File { path, source }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for detection transport errors.
    pub fn detection_failed(reason: impl Into<String>) -> Self {
        RelayError::Detection { reason: reason.into(), source: None }
    }

    /// Helper constructor for detection transport errors with source.
    pub fn detection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RelayError::Detection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for malformed detection payloads.
    pub fn malformed_detection(details: impl Into<String>) -> Self {
        RelayError::MalformedDetection { details: details.into() }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}
