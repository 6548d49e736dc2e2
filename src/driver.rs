//! Driver spawns and manages the ingest task

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::provider::Provider;
use crate::queue::DeliveryQueue;

/// Consecutive provider errors tolerated before ingest gives up
const MAX_ERRORS: u32 = 10;

/// Why the ingest task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The byte stream ended (decoder exited or replay file consumed)
    Exhausted,
    /// Shutdown was requested
    Cancelled,
    /// The delivery queue stopped accepting frames
    QueueClosed,
    /// The provider kept failing
    Failed,
}

/// Handle to a running ingest task
pub struct IngestHandle {
    /// Resolves when ingest stops
    pub task: JoinHandle<IngestOutcome>,
    extracted: Arc<AtomicU64>,
}

impl IngestHandle {
    /// Frames pulled from the provider so far
    pub fn extracted(&self) -> u64 {
        self.extracted.load(Ordering::Relaxed)
    }

    /// Shared counter of extracted frames, readable after the handle is consumed
    pub fn extracted_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.extracted)
    }
}

/// Driver spawns the task that pulls frames from a provider into the delivery queue
///
/// Ingest never waits on delivery: the queue accepts frames as fast as the
/// provider yields them.
pub struct Driver;

impl Driver {
    /// Spawn the ingest task for the given provider
    pub fn spawn<P>(provider: P, queue: DeliveryQueue, cancel: CancellationToken) -> IngestHandle
    where
        P: Provider,
    {
        // Counter shared between the task and the handle
        let extracted = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&extracted);

        // Spawn the ingest task
        let task = tokio::spawn(async move {
            Self::ingest_task(provider, queue, counter, cancel).await
        });

        IngestHandle { task, extracted }
    }

    async fn ingest_task<P>(
        mut provider: P,
        queue: DeliveryQueue,
        extracted: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> IngestOutcome
    where
        P: Provider,
    {
        let source = provider.describe();
        info!("Ingest started from {}", source);
        let mut frame_count = 0u64;
        let mut error_count = 0u32;

        let outcome = loop {
            // Cancellation may arrive while the provider waits for bytes
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingest cancelled");
                    break IngestOutcome::Cancelled;
                }
                result = provider.next_frame() => result,
            };

            match result {
                Ok(Some(frame)) => {
                    frame_count += 1;
                    error_count = 0;
                    extracted.fetch_add(1, Ordering::Relaxed);
                    trace!(sequence = frame.sequence, bytes = frame.len(), "Extracted frame");

                    // Hand off to the queue; release pacing happens there
                    if let Err(e) = queue.enqueue(frame) {
                        debug!("Stopping ingest: {}", e);
                        break IngestOutcome::QueueClosed;
                    }
                }
                Ok(None) => {
                    // Source is done, nothing left to read
                    warn!(
                        "{} ended after {} frames; no new frames will be produced",
                        source, frame_count
                    );
                    break IngestOutcome::Exhausted;
                }
                Err(e) => {
                    error_count += 1;
                    error!("Provider error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many provider errors, stopping ingest");
                        break IngestOutcome::Failed;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        info!("Ingest task ended ({} frames, {:?})", frame_count, outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ByteStreamProvider;
    use crate::queue::FrameSink;
    use crate::test_utils::{RecordingSink, concat_jpegs, synthetic_jpeg};
    use crate::types::Frame;
    use crate::{RelayError, Result};

    const INTERVAL: Duration = Duration::from_millis(200);

    struct FailingProvider {
        attempts: Arc<AtomicU64>,
    }

    #[async_trait::async_trait]
    impl Provider for FailingProvider {
        async fn next_frame(&mut self) -> Result<Option<Frame>> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(RelayError::decoder_failed("stdout broken"))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn queue_with_sink(cancel: &CancellationToken) -> (DeliveryQueue, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let sinks = vec![Arc::clone(&sink) as Arc<dyn FrameSink>];
        let (queue, _release) = DeliveryQueue::spawn(INTERVAL, 0, sinks, cancel.clone());
        (queue, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn drains_provider_into_queue() {
        let cancel = CancellationToken::new();
        let (queue, sink) = queue_with_sink(&cancel);
        let jpegs = [synthetic_jpeg(8, 1), synthetic_jpeg(9, 2), synthetic_jpeg(3, 3)];
        let bytes = concat_jpegs(&jpegs);
        let provider = ByteStreamProvider::with_chunk_size(std::io::Cursor::new(bytes), "mem", 5);

        let handle = Driver::spawn(provider, queue.clone(), cancel.clone());
        let counter = handle.extracted_counter();
        assert_eq!(handle.task.await.unwrap(), IngestOutcome::Exhausted);
        assert_eq!(counter.load(Ordering::Relaxed), 3);

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(sink.sequences(), vec![1, 2, 3]);
        assert_eq!(queue.enqueued(), 3);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_repeated_errors() {
        let cancel = CancellationToken::new();
        let (queue, _sink) = queue_with_sink(&cancel);
        let attempts = Arc::new(AtomicU64::new(0));
        let provider = FailingProvider { attempts: Arc::clone(&attempts) };

        let handle = Driver::spawn(provider, queue, cancel.clone());
        assert_eq!(handle.task.await.unwrap(), IngestOutcome::Failed);
        assert_eq!(attempts.load(Ordering::Relaxed), u64::from(MAX_ERRORS));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_waiting_provider() {
        let cancel = CancellationToken::new();
        let (queue, _sink) = queue_with_sink(&cancel);

        // Writer half stays open, so the provider waits forever
        let (_writer, reader) = tokio::io::duplex(64);
        let provider = ByteStreamProvider::new(reader, "duplex");

        let handle = Driver::spawn(provider, queue, cancel.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(handle.task.await.unwrap(), IngestOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_queue_is_closed() {
        let cancel = CancellationToken::new();
        let (queue, _sink) = queue_with_sink(&cancel);
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let bytes = concat_jpegs(&[synthetic_jpeg(4, 1)]);
        let provider = ByteStreamProvider::new(std::io::Cursor::new(bytes), "mem");
        let handle = Driver::spawn(provider, queue, CancellationToken::new());
        assert_eq!(handle.task.await.unwrap(), IngestOutcome::QueueClosed);
    }
}
