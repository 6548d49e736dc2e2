//! Generic byte-stream provider

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::Result;
use crate::extract::FrameExtractor;
use crate::provider::Provider;
use crate::types::Frame;

/// Default initial read-buffer capacity
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Provider that extracts frames from an arbitrary async byte stream
pub struct ByteStreamProvider<R> {
    frames: FramedRead<R, FrameExtractor>,
    label: String,
}

impl<R: AsyncRead> ByteStreamProvider<R> {
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self::with_chunk_size(reader, label, DEFAULT_CHUNK_SIZE)
    }

    /// Create a provider whose read buffer starts at `chunk_size` bytes
    pub fn with_chunk_size(reader: R, label: impl Into<String>, chunk_size: usize) -> Self {
        let frames = FramedRead::with_capacity(reader, FrameExtractor::new(), chunk_size.max(1));
        Self { frames, label: label.into() }
    }

    /// Bytes read but not yet resolved into a frame
    pub fn buffered_len(&self) -> usize {
        self.frames.read_buffer().len()
    }
}

#[async_trait::async_trait]
impl<R> Provider for ByteStreamProvider<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.frames.next().await.transpose()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
