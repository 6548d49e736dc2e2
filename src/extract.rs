//! JPEG frame extraction from a raw MJPEG byte stream
//!
//! The decoder writes concatenated JPEG images with no container around them. The
//! extractor accumulates bytes and cuts out every `[SOI .. EOI]` slice as soon as both
//! markers are present, carrying any unterminated remainder over to the next chunk.
//!
//! Pairing rule: the first start marker found is paired with the first end marker that
//! follows it. A second start marker seen before that end marker is treated as payload.
//!
//! The extractor can be driven two ways:
//! - [`FrameExtractor::feed`] for synchronous, in-memory use
//! - as a [`tokio_util::codec::Decoder`] behind a `FramedRead` over any `AsyncRead`
//!
//! A single instance should be used in one of the two modes, not both.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::types::Frame;
use crate::{RelayError, Result};

/// JPEG start-of-image marker
pub const START_MARKER: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker
pub const END_MARKER: [u8; 2] = [0xFF, 0xD9];

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|window| window == marker)
}

/// Incremental JPEG frame extractor
///
/// Invariant between calls: the buffer is either empty, a single trailing `0xFF`
/// (possible first half of a start marker), or begins with a start marker whose end
/// marker has not arrived yet.
#[derive(Debug)]
pub struct FrameExtractor {
    /// Bytes not yet resolved into a frame (used by `feed`)
    pending: BytesMut,

    /// Buffer currently begins with a start marker
    in_frame: bool,

    /// Offset from which the end-marker search resumes, so a large unterminated
    /// frame is not rescanned from its beginning on every chunk
    end_scan_from: usize,

    /// Sequence number of the next emitted frame
    next_sequence: u64,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self { pending: BytesMut::new(), in_frame: false, end_scan_from: 0, next_sequence: 1 }
    }

    /// Append a chunk and return every frame it completes, in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.extract(&mut buffer) {
            frames.push(frame);
        }

        self.pending = buffer;
        frames
    }

    /// Bytes carried over to the next `feed` call
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence number the next extracted frame will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Cut at most one frame from the front of `buffer`.
    fn extract(&mut self, buffer: &mut BytesMut) -> Option<Frame> {
        if !self.in_frame {
            match find_marker(buffer, START_MARKER) {
                Some(start) => {
                    if start > 0 {
                        trace!("Discarding {} bytes before start marker", start);
                    }
                    buffer.advance(start);
                    self.in_frame = true;
                    self.end_scan_from = START_MARKER.len();
                }
                None => {
                    // Keep a trailing 0xFF: it may be the first half of a start marker
                    let keep = usize::from(buffer.last() == Some(&START_MARKER[0]));
                    let discard = buffer.len() - keep;
                    buffer.advance(discard);
                    return None;
                }
            }
        }

        match find_marker(&buffer[self.end_scan_from..], END_MARKER) {
            Some(offset) => {
                let end = self.end_scan_from + offset + END_MARKER.len();
                let data = buffer.split_to(end).freeze();
                self.in_frame = false;
                self.end_scan_from = 0;

                let frame = Frame::new(data, self.next_sequence);
                self.next_sequence += 1;
                trace!(sequence = frame.sequence, bytes = frame.len(), "Extracted frame");
                Some(frame)
            }
            None => {
                // Resume one byte early: the last byte may start an end marker
                self.end_scan_from = buffer.len().saturating_sub(1).max(START_MARKER.len());
                None
            }
        }
    }
}

impl Decoder for FrameExtractor {
    type Item = Frame;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        Ok(self.extract(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.extract(src) {
            return Ok(Some(frame));
        }

        // A stream ending mid-frame is not a fault; the partial frame is abandoned
        if !src.is_empty() {
            debug!("Stream ended with {} unterminated bytes, discarding", src.len());
            src.clear();
        }
        self.in_frame = false;
        self.end_scan_from = 0;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{concat_jpegs, synthetic_jpeg};
    use proptest::prelude::*;

    fn feed_all<'a>(
        extractor: &mut FrameExtractor,
        chunks: impl IntoIterator<Item = &'a [u8]>,
    ) -> Vec<Frame> {
        chunks.into_iter().flat_map(|chunk| extractor.feed(chunk)).collect()
    }

    #[test]
    fn two_frames_split_across_chunks() {
        let first = synthetic_jpeg(100, 0x11);
        let second = synthetic_jpeg(50, 0x22);
        let stream = concat_jpegs(&[first.clone(), second.clone()]);

        for split in 0..=stream.len() {
            let mut extractor = FrameExtractor::new();
            let (a, b) = stream.split_at(split);
            let frames = feed_all(&mut extractor, [a, b]);

            assert_eq!(frames.len(), 2, "split at {split}");
            assert_eq!(frames[0].len(), 104);
            assert_eq!(frames[1].len(), 54);
            assert_eq!(frames[0].as_bytes(), &first[..]);
            assert_eq!(frames[1].as_bytes(), &second[..]);
            for frame in &frames {
                assert_eq!(frame.as_bytes()[..2], START_MARKER);
                assert_eq!(frame.as_bytes()[frame.len() - 2..], END_MARKER);
            }
            assert_eq!(extractor.buffered_len(), 0);
        }
    }

    #[test]
    fn multiple_frames_in_one_chunk_keep_order() {
        let jpegs: Vec<_> = (0..5).map(|i| synthetic_jpeg(10 + i * 3, i as u8)).collect();
        let mut extractor = FrameExtractor::new();
        let frames = extractor.feed(&concat_jpegs(&jpegs));

        assert_eq!(frames.len(), 5);
        for (i, (frame, jpeg)) in frames.iter().zip(&jpegs).enumerate() {
            assert_eq!(frame.as_bytes(), &jpeg[..]);
            assert_eq!(frame.sequence, i as u64 + 1);
        }
    }

    #[test]
    fn unterminated_frame_is_retained() {
        let mut extractor = FrameExtractor::new();
        assert!(extractor.feed(&[0xFF, 0xD8, 1, 2, 3]).is_empty());
        assert_eq!(extractor.buffered_len(), 5);

        assert!(extractor.feed(&[4, 5, 0xFF]).is_empty());
        let frames = extractor.feed(&[0xD9, 0xAA]);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[0xFF, 0xD8, 1, 2, 3, 4, 5, 0xFF, 0xD9]);
        // 0xAA precedes no start marker
        assert_eq!(extractor.buffered_len(), 0);
    }

    #[test]
    fn start_marker_split_across_chunks() {
        let mut extractor = FrameExtractor::new();
        assert!(extractor.feed(&[9, 9, 0xFF]).is_empty());
        assert_eq!(extractor.buffered_len(), 1);

        let frames = extractor.feed(&[0xD8, 7, 0xFF, 0xD9]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[0xFF, 0xD8, 7, 0xFF, 0xD9]);
    }

    #[test]
    fn second_start_before_end_is_payload() {
        let bytes = [0xFF, 0xD8, 1, 0xFF, 0xD8, 2, 0xFF, 0xD9];
        let mut extractor = FrameExtractor::new();
        let frames = extractor.feed(&bytes);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &bytes[..]);
    }

    #[test]
    fn end_marker_must_follow_start_marker() {
        // FF D8 D9 is not terminated: the end search starts after the start marker
        let mut extractor = FrameExtractor::new();
        assert!(extractor.feed(&[0xFF, 0xD8, 0xD9]).is_empty());

        // A lone end marker before any start is garbage
        let mut extractor = FrameExtractor::new();
        assert_eq!(extractor.feed(&[0xFF, 0xD9, 0xFF, 0xD8, 0xFF, 0xD9]).len(), 1);
    }

    #[test]
    fn garbage_without_markers_is_not_accumulated() {
        let mut extractor = FrameExtractor::new();
        assert!(extractor.feed(&[1u8; 4096]).is_empty());
        assert_eq!(extractor.buffered_len(), 0);
    }

    #[test]
    fn sequence_continues_across_feeds() {
        let mut extractor = FrameExtractor::new();
        extractor.feed(&synthetic_jpeg(4, 1));
        extractor.feed(&synthetic_jpeg(4, 2));
        let frames = extractor.feed(&synthetic_jpeg(4, 3));
        assert_eq!(frames[0].sequence, 3);
        assert_eq!(extractor.next_sequence(), 4);
    }

    #[test]
    fn decode_eof_abandons_partial_frame() {
        let mut extractor = FrameExtractor::new();
        let mut buffer = BytesMut::from(&[0xFF, 0xD8, 1, 2][..]);

        assert!(extractor.decode(&mut buffer).unwrap().is_none());
        assert!(extractor.decode_eof(&mut buffer).unwrap().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn decoder_yields_frames_one_at_a_time() {
        let stream = concat_jpegs(&[synthetic_jpeg(3, 1), synthetic_jpeg(6, 2)]);
        let mut extractor = FrameExtractor::new();
        let mut buffer = BytesMut::from(&stream[..]);

        let first = extractor.decode(&mut buffer).unwrap().unwrap();
        let second = extractor.decode(&mut buffer).unwrap().unwrap();
        assert!(extractor.decode(&mut buffer).unwrap().is_none());
        assert_eq!((first.len(), second.len()), (7, 10));
    }

    fn jpeg_strategy() -> impl Strategy<Value = Vec<u8>> {
        // Payload bytes never contain 0xFF, so every image is well formed
        prop::collection::vec(0u8..0xFF, 0..64).prop_map(|payload| {
            let mut jpeg = START_MARKER.to_vec();
            jpeg.extend(payload);
            jpeg.extend(END_MARKER);
            jpeg
        })
    }

    proptest! {
        #[test]
        fn arbitrary_chunking_yields_every_frame(
            jpegs in prop::collection::vec(jpeg_strategy(), 0..12),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16)
        ) {
            let stream = concat_jpegs(&jpegs);

            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
            points.sort_unstable();
            points.dedup();

            let mut extractor = FrameExtractor::new();
            let mut frames = Vec::new();
            let mut last = 0;
            for point in points.into_iter().chain(std::iter::once(stream.len())) {
                frames.extend(extractor.feed(&stream[last..point]));
                last = point;
            }

            prop_assert_eq!(frames.len(), jpegs.len());
            for (frame, jpeg) in frames.iter().zip(&jpegs) {
                prop_assert_eq!(frame.as_bytes(), &jpeg[..]);
            }
        }

        #[test]
        fn byte_at_a_time_matches_whole_stream(
            jpegs in prop::collection::vec(jpeg_strategy(), 0..8),
            noise in prop::collection::vec(any::<u8>(), 0..32)
        ) {
            let mut stream = noise;
            stream.extend(concat_jpegs(&jpegs));

            let whole = FrameExtractor::new().feed(&stream);

            let mut extractor = FrameExtractor::new();
            let bytewise: Vec<Frame> =
                stream.iter().flat_map(|b| extractor.feed(std::slice::from_ref(b))).collect();

            prop_assert_eq!(whole, bytewise);
        }
    }
}
