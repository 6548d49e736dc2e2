//! Test utilities: synthetic JPEG streams and mock pipeline collaborators
//!
//! Shared by unit tests, the integration test and the benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use bytes::Bytes;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::broadcast::{Outbound, ViewerTransport};
use crate::detection::DetectionBackend;
use crate::extract::{END_MARKER, START_MARKER};
use crate::queue::FrameSink;
use crate::types::{DetectionResult, Frame};
use crate::{RelayError, Result};

/// Build a well-formed JPEG-like image with `payload_len` bytes between the markers.
///
/// Payload bytes never contain `0xFF`, so the image contains exactly one start and
/// one end marker and is `payload_len + 4` bytes long.
pub fn synthetic_jpeg(payload_len: usize, fill: u8) -> Vec<u8> {
    let mut jpeg = Vec::with_capacity(payload_len + 4);
    jpeg.extend_from_slice(&START_MARKER);
    jpeg.extend((0..payload_len).map(|i| ((fill as usize + i) % 0xFF) as u8));
    jpeg.extend_from_slice(&END_MARKER);
    jpeg
}

/// Concatenate images the way the decoder writes them: back to back, no container.
pub fn concat_jpegs(jpegs: &[Vec<u8>]) -> Vec<u8> {
    jpegs.iter().flatten().copied().collect()
}

/// Unique scratch path under the system temp directory.
pub fn temp_path(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("framecast-{}-{}-{}", std::process::id(), n, name))
}

/// In-memory viewer transport recording everything it accepts
pub struct MockViewer {
    ready: AtomicBool,
    fail_sends: bool,
    received: Mutex<Vec<Outbound>>,
}

impl MockViewer {
    pub fn new(ready: bool) -> Self {
        Self { ready: AtomicBool::new(ready), fail_sends: false, received: Mutex::new(Vec::new()) }
    }

    /// A viewer that reports ready but rejects every send
    pub fn failing() -> Self {
        Self { ready: AtomicBool::new(true), fail_sends: true, received: Mutex::new(Vec::new()) }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn received(&self) -> Vec<Outbound> {
        self.received.lock().unwrap().clone()
    }

    /// Text messages received, in order
    pub fn texts(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Text(text) => Some(text.to_string()),
                Outbound::Binary(_) => None,
            })
            .collect()
    }

    /// Number of binary (frame) messages received
    pub fn frame_count(&self) -> usize {
        self.received().iter().filter(|m| matches!(m, Outbound::Binary(_))).count()
    }
}

impl ViewerTransport for MockViewer {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn send(&self, message: Outbound) -> Result<()> {
        if self.fail_sends {
            return Err(RelayError::ViewerSend { viewer: 0, reason: "mock failure".to_string() });
        }
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}

/// Frame sink that records each release with its (tokio) timestamp
#[derive(Default)]
pub struct RecordingSink {
    releases: Mutex<Vec<(u64, tokio::time::Instant)>>,
}

impl RecordingSink {
    pub fn releases(&self) -> Vec<(u64, tokio::time::Instant)> {
        self.releases.lock().unwrap().clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.releases().into_iter().map(|(seq, _)| seq).collect()
    }
}

impl FrameSink for RecordingSink {
    fn on_release(&self, frame: &Frame) {
        self.releases.lock().unwrap().push((frame.sequence, tokio::time::Instant::now()));
    }
}

/// Scripted answer for one [`MockBackend`] call
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Answer with this result
    Found(DetectionResult),
    /// Answer with a non-success HTTP status
    Status(u16),
    /// Never answer
    Stall,
}

/// Detection backend driven by a script of outcomes
///
/// Each call takes the next scripted outcome; once the script runs out the
/// fallback outcome is used. Every call waits `delay` before answering.
pub struct MockBackend {
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: MockOutcome,
    delay: Duration,
    calls: AtomicUsize,
    uploads: Mutex<Vec<Bytes>>,
}

impl MockBackend {
    pub fn new(fallback: MockOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Backend that always finds `count` objects
    pub fn finding(count: usize) -> Self {
        Self::new(MockOutcome::Found(sample_result(count)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.script.lock().unwrap().extend(outcomes);
        self
    }

    /// Calls started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// JPEG bodies received, in call order
    pub fn uploads(&self) -> Vec<Bytes> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DetectionBackend for MockBackend {
    async fn detect(&self, jpeg: Bytes) -> Result<DetectionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.uploads.lock().unwrap().push(jpeg);
        let scripted = self.script.lock().unwrap().pop_front();
        let outcome = scripted.unwrap_or_else(|| self.fallback.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match outcome {
            MockOutcome::Found(result) => Ok(result),
            MockOutcome::Status(status) => Err(RelayError::DetectionStatus { status }),
            MockOutcome::Stall => std::future::pending().await,
        }
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

/// A consistent result with `count` objects
pub fn sample_result(count: usize) -> DetectionResult {
    DetectionResult {
        boxes: (0..count).map(|i| [i as f64, i as f64, i as f64 + 10.0, i as f64 + 10.0]).collect(),
        labels: (0..count).map(|i| format!("object-{i}")).collect(),
        scores: (0..count).map(|i| 1.0 / (i as f64 + 1.0)).collect(),
    }
}
