//! Fan-out of frames and detection messages to connected viewers
//!
//! The viewer set lives in a mutex-guarded registry owned by [`BroadcastSink`].
//! Connections register on connect and unregister on disconnect; a broadcast
//! snapshots the set and offers the payload to each viewer without holding the lock.
//! A viewer that is not ready (closed, or with a full outbound buffer) is skipped
//! silently: no retry, no buffering on its behalf.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::queue::FrameSink;
use crate::types::{Frame, ViewerMessage};
use crate::{RelayError, Result};

/// Identifier assigned to a viewer at registration
pub type ViewerId = u64;

/// A payload as it goes out on the viewer transport
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Raw JPEG bytes
    Binary(Bytes),
    /// Serialized [`ViewerMessage`]
    Text(Arc<str>),
}

/// Transport-level handle for one viewer
pub trait ViewerTransport: Send + Sync {
    /// Whether the transport is open and can take a message right now
    fn is_ready(&self) -> bool;

    /// Hand a message to the transport without waiting
    fn send(&self, message: Outbound) -> Result<()>;
}

/// Transport backed by a bounded channel drained by the connection task
pub struct ChannelTransport {
    viewer: ViewerId,
    tx: mpsc::Sender<Outbound>,
}

impl ViewerTransport for ChannelTransport {
    fn is_ready(&self) -> bool {
        !self.tx.is_closed() && self.tx.capacity() > 0
    }

    fn send(&self, message: Outbound) -> Result<()> {
        self.tx.try_send(message).map_err(|e| RelayError::ViewerSend {
            viewer: self.viewer,
            reason: match e {
                mpsc::error::TrySendError::Full(_) => "outbound buffer full".to_string(),
                mpsc::error::TrySendError::Closed(_) => "connection closed".to_string(),
            },
        })
    }
}

struct Registry {
    viewers: Mutex<HashMap<ViewerId, Arc<dyn ViewerTransport>>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    connected: AtomicUsize,
}

/// Broadcast sink owning the live viewer set
///
/// Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct BroadcastSink {
    inner: Arc<Registry>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                viewers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                delivered: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                connected: AtomicUsize::new(0),
            }),
        }
    }

    fn viewers(&self) -> std::sync::MutexGuard<'_, HashMap<ViewerId, Arc<dyn ViewerTransport>>> {
        self.inner.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a viewer with its own transport
    pub fn register(&self, transport: Arc<dyn ViewerTransport>) -> ViewerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.viewers().insert(id, transport);
        let connected = self.inner.connected.fetch_add(1, Ordering::Relaxed) + 1;
        info!(viewer = id, connected, "Viewer connected");
        id
    }

    /// Add a viewer served through a bounded channel of `capacity` messages
    ///
    /// The caller drains the returned receiver into the real connection.
    pub fn register_channel(&self, capacity: usize) -> (ViewerId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.viewers().insert(id, Arc::new(ChannelTransport { viewer: id, tx }));
        let connected = self.inner.connected.fetch_add(1, Ordering::Relaxed) + 1;
        info!(viewer = id, connected, "Viewer connected");
        (id, rx)
    }

    /// Remove a viewer; unknown ids are ignored
    pub fn unregister(&self, id: ViewerId) {
        if self.viewers().remove(&id).is_some() {
            let connected = self.inner.connected.fetch_sub(1, Ordering::Relaxed) - 1;
            info!(viewer = id, connected, "Viewer disconnected");
        }
    }

    /// Number of registered viewers
    pub fn viewer_count(&self) -> usize {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Offer a payload to every ready viewer, returning how many accepted it
    pub fn broadcast(&self, payload: Outbound) -> usize {
        let snapshot: Vec<(ViewerId, Arc<dyn ViewerTransport>)> =
            self.viewers().iter().map(|(id, t)| (*id, Arc::clone(t))).collect();

        let mut delivered = 0;
        for (id, transport) in snapshot {
            if !transport.is_ready() {
                trace!(viewer = id, "Skipping viewer that is not ready");
                self.inner.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match transport.send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    trace!(viewer = id, "Skipping viewer: {}", e);
                    self.inner.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.inner.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Broadcast raw frame bytes as a binary message
    pub fn broadcast_frame(&self, frame: &Frame) -> usize {
        self.broadcast(Outbound::Binary(frame.data.clone()))
    }

    /// Broadcast a structured message as JSON text
    pub fn broadcast_message(&self, message: &ViewerMessage) -> Result<usize> {
        let text = message.to_json().map_err(|e| {
            RelayError::malformed_detection(format!("cannot serialize viewer message: {e}"))
        })?;
        Ok(self.broadcast(Outbound::Text(Arc::from(text))))
    }

    /// Total (delivered, skipped) per-viewer sends since creation
    pub fn delivery_counts(&self) -> (u64, u64) {
        (self.inner.delivered.load(Ordering::Relaxed), self.inner.skipped.load(Ordering::Relaxed))
    }
}

impl FrameSink for BroadcastSink {
    fn on_release(&self, frame: &Frame) {
        let delivered = self.broadcast_frame(frame);
        debug!(sequence = frame.sequence, delivered, "Frame broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockViewer;
    use crate::types::DetectionResult;

    #[test]
    fn only_ready_viewers_receive() {
        let sink = BroadcastSink::new();
        let viewers: Vec<Arc<MockViewer>> =
            (0..6).map(|i| Arc::new(MockViewer::new(i % 2 == 0))).collect();
        for viewer in &viewers {
            sink.register(viewer.clone());
        }

        let frame = Frame::new(vec![0xFF, 0xD8, 0xFF, 0xD9], 1);
        assert_eq!(sink.broadcast_frame(&frame), 3);

        for (i, viewer) in viewers.iter().enumerate() {
            let received = viewer.received();
            if i % 2 == 0 {
                assert_eq!(received, vec![Outbound::Binary(frame.data.clone())]);
            } else {
                assert!(received.is_empty());
            }
        }
        assert_eq!(sink.delivery_counts(), (3, 3));
    }

    #[test]
    fn readiness_is_checked_per_broadcast() {
        let sink = BroadcastSink::new();
        let viewer = Arc::new(MockViewer::new(true));
        sink.register(viewer.clone());

        for sequence in 1..=6 {
            // Busy for frames 3 and 4 only
            viewer.set_ready(!(3..=4).contains(&sequence));
            let frame = Frame::new(vec![0xFF, 0xD8, sequence as u8, 0xFF, 0xD9], sequence);
            sink.broadcast_frame(&frame);
        }

        let payloads: Vec<u8> = viewer
            .received()
            .iter()
            .filter_map(|m| match m {
                Outbound::Binary(bytes) => Some(bytes[2]),
                Outbound::Text(_) => None,
            })
            .collect();
        assert_eq!(payloads, vec![1, 2, 5, 6]);
        assert_eq!(sink.delivery_counts(), (4, 2));
    }

    #[test]
    fn failing_viewer_does_not_affect_others() {
        let sink = BroadcastSink::new();
        let broken = Arc::new(MockViewer::failing());
        let healthy = Arc::new(MockViewer::new(true));
        sink.register(broken.clone());
        sink.register(healthy.clone());

        assert_eq!(sink.broadcast(Outbound::Binary(Bytes::from_static(b"x"))), 1);
        assert_eq!(healthy.received().len(), 1);
        assert!(broken.received().is_empty());
    }

    #[test]
    fn unregistered_viewer_receives_nothing() {
        let sink = BroadcastSink::new();
        let viewer = Arc::new(MockViewer::new(true));
        let id = sink.register(viewer.clone());
        assert_eq!(sink.viewer_count(), 1);

        sink.unregister(id);
        sink.unregister(id);
        assert_eq!(sink.viewer_count(), 0);
        assert_eq!(sink.broadcast(Outbound::Text(Arc::from("{}"))), 0);
        assert!(viewer.received().is_empty());
    }

    #[test]
    fn messages_go_out_as_text() {
        let sink = BroadcastSink::new();
        let viewer = Arc::new(MockViewer::new(true));
        sink.register(viewer.clone());

        let message = ViewerMessage::detections(DetectionResult::default(), Some(3));
        assert_eq!(sink.broadcast_message(&message).unwrap(), 1);

        match &viewer.received()[0] {
            Outbound::Text(text) => assert!(text.contains(r#""type":"detections""#)),
            other => panic!("Expected text message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_channel_viewer_is_not_ready() {
        let sink = BroadcastSink::new();
        let (_, mut rx) = sink.register_channel(1);

        assert_eq!(sink.broadcast(Outbound::Binary(Bytes::from_static(b"a"))), 1);
        // Buffer full: skipped, not queued
        assert_eq!(sink.broadcast(Outbound::Binary(Bytes::from_static(b"b"))), 0);

        assert_eq!(rx.recv().await, Some(Outbound::Binary(Bytes::from_static(b"a"))));
        assert_eq!(sink.broadcast(Outbound::Binary(Bytes::from_static(b"c"))), 1);
        assert_eq!(rx.recv().await, Some(Outbound::Binary(Bytes::from_static(b"c"))));
    }

    #[tokio::test]
    async fn closed_channel_viewer_is_skipped() {
        let sink = BroadcastSink::new();
        let (_, rx) = sink.register_channel(4);
        drop(rx);
        assert_eq!(sink.broadcast(Outbound::Binary(Bytes::from_static(b"a"))), 0);
    }

    #[test]
    fn concurrent_register_and_broadcast() {
        let sink = BroadcastSink::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let id = sink.register(Arc::new(MockViewer::new(true)));
                        sink.broadcast(Outbound::Binary(Bytes::from_static(b"f")));
                        sink.unregister(id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.viewer_count(), 0);
    }
}
