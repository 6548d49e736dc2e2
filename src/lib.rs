//! MJPEG relay with throttled object detection.
//!
//! Framecast reads the concatenated-JPEG byte stream an external decoder writes to
//! its stdout, cuts it into frames, releases them at a fixed cadence to every
//! connected WebSocket viewer and forwards a rate-limited sample to an HTTP
//! detection backend whose results are pushed to the same viewers.
//!
//! # Pipeline
//!
//! ```text
//! decoder stdout → FrameExtractor → DeliveryQueue ─┬→ BroadcastSink → viewers
//!                                                  └→ DetectionSampler → backend → BroadcastSink
//! ```
//!
//! - **Extraction** never blocks and never raises on malformed input
//! - **Delivery** is strictly FIFO with a minimum gap between releases; nothing is dropped
//! - **Detection** keeps at most one call in flight and at most one call per window
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framecast::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> framecast::Result<()> {
//!     let config = RelayConfig::load("framecast.yaml")?;
//!     let mut relay = Relay::start(&config).await?;
//!     relay.wait().await?;
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Extracting frames without the runtime
//!
//! ```rust
//! use framecast::FrameExtractor;
//!
//! let mut extractor = FrameExtractor::new();
//! assert!(extractor.feed(&[0xFF, 0xD8, 1, 2]).is_empty());
//!
//! let frames = extractor.feed(&[3, 0xFF, 0xD9]);
//! assert_eq!(frames[0].as_bytes(), &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Frame pipeline
pub mod broadcast;
pub mod detection;
pub mod driver;
pub mod extract;
pub mod provider;
pub mod providers;
pub mod queue;
pub mod stream;

// Runtime assembly
pub mod relay;
pub mod server;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use broadcast::{BroadcastSink, Outbound, ViewerTransport};
pub use config::RelayConfig;
pub use detection::{DetectionBackend, DetectionSampler, HttpDetectionBackend};
pub use extract::FrameExtractor;
pub use provider::Provider;
pub use queue::{DeliveryQueue, FrameSink};
pub use relay::{Relay, RelayStats};
