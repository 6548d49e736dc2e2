//! Throttled detection sampler

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::DetectionBackend;
use crate::broadcast::BroadcastSink;
use crate::queue::FrameSink;
use crate::types::{DetectionResult, Frame, ViewerMessage};
use crate::{RelayError, Result};

/// Snapshot of sampler activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionCounts {
    /// Calls started
    pub issued: u64,
    /// Calls that produced a broadcast result
    pub succeeded: u64,
    /// Calls that failed, timed out or returned a malformed result
    pub failed: u64,
    /// Frames passed over because of the throttle or an in-flight call
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    issued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

struct Shared {
    backend: Arc<dyn DetectionBackend>,
    viewers: BroadcastSink,
    min_interval: Duration,
    timeout: Duration,
    /// Single slot: held by the in-flight call, released when it finishes however it ends
    slot: Arc<Semaphore>,
    last_started: Mutex<Option<Instant>>,
    counters: Counters,
    cancel: CancellationToken,
}

/// Samples released frames for detection
///
/// A frame is sent to the backend only when no call is in flight and at least
/// `min_interval` has passed since the previous call started. Everything else is
/// skipped. Results are broadcast as [`ViewerMessage::Detections`]; failures are
/// logged and dropped.
#[derive(Clone)]
pub struct DetectionSampler {
    shared: Arc<Shared>,
}

impl DetectionSampler {
    pub fn new(
        backend: Arc<dyn DetectionBackend>,
        viewers: BroadcastSink,
        min_interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        info!(
            "Detection sampler targeting {} (every {:?}, {:?} timeout)",
            backend.endpoint(),
            min_interval,
            timeout
        );
        Self {
            shared: Arc::new(Shared {
                backend,
                viewers,
                min_interval,
                timeout,
                slot: Arc::new(Semaphore::new(1)),
                last_started: Mutex::new(None),
                counters: Counters::default(),
                cancel,
            }),
        }
    }

    /// Offer a frame for detection
    ///
    /// Returns `true` if a call was started. Never waits on the backend; must be
    /// called from within a tokio runtime.
    pub fn sample(&self, frame: &Frame) -> bool {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return false;
        }

        let now = Instant::now();
        let mut last_started = shared.last_started.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = *last_started {
            if now.duration_since(previous) < shared.min_interval {
                shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = frame.sequence, "Detection throttled");
                return false;
            }
        }

        let Ok(permit) = Arc::clone(&shared.slot).try_acquire_owned() else {
            shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
            trace!(sequence = frame.sequence, "Detection call still in flight");
            return false;
        };

        *last_started = Some(now);
        drop(last_started);
        shared.counters.issued.fetch_add(1, Ordering::Relaxed);

        let task = Arc::clone(shared);
        let jpeg = frame.data.clone();
        let sequence = frame.sequence;
        tokio::spawn(async move {
            task.run(jpeg, sequence).await;
            drop(permit);
        });
        true
    }

    /// Whether a detection call is currently outstanding
    pub fn in_flight(&self) -> bool {
        self.shared.slot.available_permits() == 0
    }

    pub fn counts(&self) -> DetectionCounts {
        let counters = &self.shared.counters;
        DetectionCounts {
            issued: counters.issued.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Shared {
    async fn run(&self, jpeg: Bytes, sequence: u64) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(sequence, "Detection call abandoned on shutdown");
                return;
            }
            outcome = self.call(jpeg) => outcome,
        };

        match outcome {
            Ok(result) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(sequence, "Detection completed - found {} objects", result.len());

                let message = ViewerMessage::detections(result, Some(sequence));
                match self.viewers.broadcast_message(&message) {
                    Ok(delivered) => debug!(sequence, delivered, "Detections broadcast"),
                    Err(e) => warn!(sequence, "Failed to broadcast detections: {}", e),
                }
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, retryable = e.is_retryable(), "Detection failed: {}", e);
            }
        }
    }

    async fn call(&self, jpeg: Bytes) -> Result<DetectionResult> {
        let result = tokio::time::timeout(self.timeout, self.backend.detect(jpeg))
            .await
            .map_err(|_| RelayError::Timeout { duration: self.timeout })??;
        result.validate()?;
        Ok(result)
    }
}

impl FrameSink for DetectionSampler {
    fn on_release(&self, frame: &Frame) {
        self.sample(frame);
    }
}
