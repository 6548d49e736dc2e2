//! Core types flowing through the relay.
//!
//! - [`Frame`] is one complete JPEG image cut from the decoder byte stream
//! - [`DetectionResult`] is the annotation set returned by the detection backend
//! - [`ViewerMessage`] is the tagged text message viewers receive next to raw frames
//!
//! ## Usage Example
//!
//! ```rust
//! use framecast::types::{DetectionResult, ViewerMessage};
//!
//! let result = DetectionResult {
//!     boxes: vec![[10.0, 20.0, 110.0, 220.0]],
//!     labels: vec!["car".to_string()],
//!     scores: vec![0.91],
//! };
//! result.validate().unwrap();
//!
//! let json = ViewerMessage::detections(result, Some(42)).to_json().unwrap();
//! assert!(json.contains(r#""type":"detections""#));
//! ```

mod detection;
mod frame;

pub use detection::*;
pub use frame::*;
