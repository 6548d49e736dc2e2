//! Timed delivery queue
//!
//! Frames are enqueued as fast as the extractor produces them and released one at a
//! time at a fixed cadence, strictly in FIFO order. Each release notifies every
//! [`FrameSink`] synchronously before the next release window opens.
//!
//! The queue never drops a frame. If production outpaces the cadence the backlog grows
//! without bound; a warning is logged each time it passes another multiple of the
//! configured threshold.

use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::stream::PaceExt;
use crate::types::Frame;
use crate::{RelayError, Result};

/// Consumer notified for every released frame
///
/// Implementations must not block: they run inside the release step.
pub trait FrameSink: Send + Sync {
    fn on_release(&self, frame: &Frame);
}

impl<T: FrameSink + ?Sized> FrameSink for Arc<T> {
    fn on_release(&self, frame: &Frame) {
        (**self).on_release(frame)
    }
}

#[derive(Default)]
struct Counters {
    depth: AtomicUsize,
    enqueued: AtomicU64,
    released: AtomicU64,
    /// Highest threshold multiple already warned about; reset when the queue empties
    warned_level: AtomicUsize,
    backlog_warnings: AtomicU64,
}

/// Handle to a running delivery queue
///
/// Cloning yields another producer handle for the same queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Frame>,
    counters: Arc<Counters>,
    interval: Duration,
    backlog_warn_threshold: usize,
}

impl DeliveryQueue {
    /// Spawn the release task
    ///
    /// The task ends when `cancel` fires or every producer handle is dropped and
    /// the backlog has drained.
    pub fn spawn(
        interval: Duration,
        backlog_warn_threshold: usize,
        sinks: Vec<Arc<dyn FrameSink>>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let task_counters = Arc::clone(&counters);
        let handle = tokio::spawn(async move {
            Self::release_task(rx, interval, sinks, task_counters, cancel).await;
        });

        (Self { tx, counters, interval, backlog_warn_threshold }, handle)
    }

    async fn release_task(
        rx: mpsc::UnboundedReceiver<Frame>,
        interval: Duration,
        sinks: Vec<Arc<dyn FrameSink>>,
        counters: Arc<Counters>,
        cancel: CancellationToken,
    ) {
        info!("Delivery queue started ({:?} release interval, {} sinks)", interval, sinks.len());
        // Paced holds a Sleep, so it must be pinned before polling
        let releases = UnboundedReceiverStream::new(rx).paced(interval);
        tokio::pin!(releases);

        loop {
            // Wait for the next release window or cancellation
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Delivery queue cancelled");
                    break;
                }
                next = releases.next() => next,
            };

            let Some(frame) = next else {
                debug!("All producers gone, delivery queue drained");
                break;
            };

            let queued = counters.depth.fetch_sub(1, Ordering::Relaxed) - 1;
            if queued == 0 {
                counters.warned_level.store(0, Ordering::Relaxed);
            }
            for sink in &sinks {
                sink.on_release(&frame);
            }
            counters.released.fetch_add(1, Ordering::Relaxed);
            trace!(sequence = frame.sequence, queued, "Released frame");
        }

        info!(
            "Delivery queue stopped ({} released, {} left queued)",
            counters.released.load(Ordering::Relaxed),
            counters.depth.load(Ordering::Relaxed)
        );
    }

    /// Append a frame to the back of the queue
    ///
    /// Fails only when the release task has stopped.
    pub fn enqueue(&self, frame: Frame) -> Result<()> {
        let depth = self.counters.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(mpsc::error::SendError(frame)) = self.tx.send(frame) {
            self.counters.depth.fetch_sub(1, Ordering::Relaxed);
            trace!(sequence = frame.sequence, "Frame offered to stopped delivery queue");
            return Err(RelayError::Shutdown { component: "delivery queue".to_string() });
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        self.note_backlog(depth);
        Ok(())
    }

    /// Warn once per threshold multiple the backlog climbs past
    fn note_backlog(&self, depth: usize) {
        if self.backlog_warn_threshold == 0 {
            return;
        }
        let level = depth / self.backlog_warn_threshold;
        if level == 0 {
            return;
        }

        let previous = self.counters.warned_level.fetch_max(level, Ordering::Relaxed);
        if level > previous {
            self.counters.backlog_warnings.fetch_add(1, Ordering::Relaxed);
            warn!(queued = depth, "Delivery backlog growing: source outpaces release cadence");
        }
    }

    /// Frames waiting for release
    pub fn depth(&self) -> usize {
        self.counters.depth.load(Ordering::Relaxed)
    }

    pub fn enqueued(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::Relaxed)
    }

    /// Backlog warnings logged so far
    pub fn backlog_warnings(&self) -> u64 {
        self.counters.backlog_warnings.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
