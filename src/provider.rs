//! Provider trait for frame sources

use crate::Result;
use crate::types::Frame;

/// Trait for frame sources
///
/// Providers abstract over where the MJPEG byte stream comes from (a spawned
/// decoder, a recorded file, an in-memory buffer) and hand back complete frames
/// in stream order. They never pace output; the delivery queue does that.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Get the next extracted frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - New frame available
    /// - `Ok(None)` - Byte stream ended (normal termination)
    /// - `Err(e)` - Reading the byte stream failed
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Short description of the source for logging
    fn describe(&self) -> String;
}
