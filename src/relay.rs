//! Relay assembly: source → delivery queue → viewers and detection

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastSink;
use crate::config::RelayConfig;
use crate::detection::{DetectionBackend, DetectionCounts, DetectionSampler, HttpDetectionBackend};
use crate::driver::{Driver, IngestOutcome};
use crate::provider::Provider;
use crate::providers::{DecoderCommand, DecoderProvider, ReplayProvider};
use crate::queue::{DeliveryQueue, FrameSink};
use crate::server::ViewerServer;
use crate::{RelayError, Result};

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_extracted: u64,
    pub frames_released: u64,
    /// Frames waiting in the delivery queue
    pub frames_queued: usize,
    pub viewers_connected: usize,
    /// Per-viewer sends accepted by a transport
    pub viewer_sends: u64,
    /// Per-viewer sends skipped because the viewer was not ready
    pub viewer_skips: u64,
    pub detections: DetectionCounts,
}

/// A running relay
///
/// Owns every pipeline task. Dropping the relay cancels them; [`Relay::shutdown`]
/// also waits for them to finish.
pub struct Relay {
    viewers: BroadcastSink,
    queue: DeliveryQueue,
    sampler: Option<DetectionSampler>,
    extracted: Arc<AtomicU64>,
    ingest: Option<JoinHandle<IngestOutcome>>,
    release: Option<JoinHandle<()>>,
    server: Option<JoinHandle<Result<()>>>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Relay {
    /// Start a relay from configuration
    ///
    /// Spawns the configured decoder (or opens the replay file) and, when
    /// detection is enabled, targets the configured HTTP backend.
    pub async fn start(config: &RelayConfig) -> Result<Self> {
        config.validate()?;

        let backend: Option<Arc<dyn DetectionBackend>> = if config.detection.enabled {
            Some(Arc::new(HttpDetectionBackend::from_config(&config.detection)?))
        } else {
            info!("Detection disabled");
            None
        };

        let source = &config.source;
        if source.replay {
            let provider = ReplayProvider::open(&source.input, source.read_chunk_size).await?;
            Self::with_provider(config, provider, backend).await
        } else {
            let command = DecoderCommand::from_config(source);
            let provider = DecoderProvider::spawn(&command, source.read_chunk_size)?;
            Self::with_provider(config, provider, backend).await
        }
    }

    /// Start a relay around an explicit frame source and detection backend
    pub async fn with_provider<P>(
        config: &RelayConfig,
        provider: P,
        backend: Option<Arc<dyn DetectionBackend>>,
    ) -> Result<Self>
    where
        P: Provider,
    {
        let cancel = CancellationToken::new();
        let viewers = BroadcastSink::new();

        // Bind first so a busy port fails before any task starts
        let server = ViewerServer::bind(&config.viewer, viewers.clone(), cancel.clone()).await?;
        let local_addr = server.local_addr();

        // Detection sampler shares the viewer set for its results
        let sampler = backend.map(|backend| {
            DetectionSampler::new(
                backend,
                viewers.clone(),
                config.detection.min_interval(),
                config.detection.timeout(),
                cancel.clone(),
            )
        });

        // Every released frame goes to viewers first, then to the sampler
        let mut sinks = vec![Arc::new(viewers.clone()) as Arc<dyn FrameSink>];
        if let Some(sampler) = &sampler {
            sinks.push(Arc::new(sampler.clone()));
        }

        let (queue, release) = DeliveryQueue::spawn(
            config.delivery.release_interval(),
            config.delivery.backlog_warn_threshold,
            sinks,
            cancel.clone(),
        );

        // Start ingest last so nothing is produced before a consumer exists
        let ingest = Driver::spawn(provider, queue.clone(), cancel.clone());
        let extracted = ingest.extracted_counter();
        let server = tokio::spawn(server.run());

        info!(
            "Relay started: viewers on ws://{}, releasing every {:?}",
            local_addr,
            config.delivery.release_interval()
        );

        Ok(Self {
            viewers,
            queue,
            sampler,
            extracted,
            ingest: Some(ingest.task),
            release: Some(release),
            server: Some(server),
            local_addr,
            cancel,
        })
    }

    /// The live viewer set
    pub fn viewers(&self) -> &BroadcastSink {
        &self.viewers
    }

    /// Address the viewer endpoint is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops every pipeline task when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> RelayStats {
        let (viewer_sends, viewer_skips) = self.viewers.delivery_counts();
        RelayStats {
            frames_extracted: self.extracted.load(Ordering::Relaxed),
            frames_released: self.queue.released(),
            frames_queued: self.queue.depth(),
            viewers_connected: self.viewers.viewer_count(),
            viewer_sends,
            viewer_skips,
            detections: self.sampler.as_ref().map(|s| s.counts()).unwrap_or_default(),
        }
    }

    /// Wait until the session is over
    ///
    /// Returns once the source has ended and every queued frame has been released,
    /// or with an error if the viewer endpoint fails.
    pub async fn wait(&mut self) -> Result<IngestOutcome> {
        let (Some(ingest), Some(server)) = (self.ingest.as_mut(), self.server.as_mut()) else {
            return Err(shutdown_error("relay"));
        };

        // Whichever of source or viewer endpoint stops first ends the session
        let finished = tokio::select! {
            joined = ingest => Finished::Ingest(joined),
            served = server => Finished::Server(served),
        };

        let outcome = match finished {
            Finished::Ingest(joined) => {
                self.ingest = None;
                joined.map_err(|_| shutdown_error("ingest task"))?
            }
            Finished::Server(served) => {
                self.server = None;
                served.map_err(|_| shutdown_error("viewer endpoint"))??;
                return Err(shutdown_error("viewer endpoint"));
            }
        };

        // Let the queue release what is left at its own cadence
        let interval = self.queue.interval();
        while self.queue.depth() > 0 && !self.cancel.is_cancelled() {
            tokio::time::sleep(interval).await;
        }
        debug!("Delivery queue drained after {:?}", outcome);
        Ok(outcome)
    }

    /// Cancel every task and wait for them to stop
    pub async fn shutdown(mut self) -> RelayStats {
        info!("Shutting down relay");
        self.cancel.cancel();

        // Wait for each task in pipeline order
        if let Some(ingest) = self.ingest.take() {
            if let Err(e) = ingest.await {
                error!("Ingest task failed: {}", e);
            }
        }
        if let Some(release) = self.release.take() {
            if let Err(e) = release.await {
                error!("Delivery task failed: {}", e);
            }
        }
        if let Some(server) = self.server.take() {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Viewer endpoint stopped with error: {}", e),
                Err(e) => error!("Viewer endpoint task failed: {}", e),
            }
        }

        let stats = self.stats();
        info!("Relay stopped: {:?}", stats);
        stats
    }
}

enum Finished {
    Ingest(std::result::Result<IngestOutcome, JoinError>),
    Server(std::result::Result<Result<()>, JoinError>),
}

fn shutdown_error(component: &str) -> RelayError {
    RelayError::Shutdown { component: component.to_string() }
}

impl Drop for Relay {
    fn drop(&mut self) {
        debug!("Dropping relay");
        self.cancel.cancel();
    }
}
