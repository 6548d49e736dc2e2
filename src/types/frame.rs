//! Frame type for the extraction pipeline

use bytes::Bytes;

/// One complete encoded image cut from the decoder byte stream
///
/// The payload starts with the JPEG start-of-image marker and ends with the
/// end-of-image marker. Cloning is cheap; every consumer shares the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Encoded image bytes, markers included
    pub data: Bytes,

    /// Monotonic extraction counter, starting at 1
    pub sequence: u64,
}

impl Frame {
    /// Create a new frame
    pub fn new(data: impl Into<Bytes>, sequence: u64) -> Self {
        Self { data: data.into(), sequence }
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
