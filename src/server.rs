//! WebSocket endpoint for viewers
//!
//! Each upgraded connection registers a channel-backed viewer with the
//! [`BroadcastSink`] and drains it into the socket. Inbound messages are read
//! only to notice the viewer leaving.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::broadcast::{BroadcastSink, Outbound};
use crate::config::ViewerConfig;
use crate::{RelayError, Result};

#[derive(Clone)]
struct ServerState {
    viewers: BroadcastSink,
    outbound_buffer: usize,
    cancel: CancellationToken,
}

/// Routes: WebSocket upgrade on `/` and `/ws`, liveness on `/healthz`
pub fn router(viewers: BroadcastSink, outbound_buffer: usize, cancel: CancellationToken) -> Router {
    let state = ServerState { viewers, outbound_buffer, cancel };
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| viewer_connection(socket, state))
}

async fn viewer_connection(socket: WebSocket, state: ServerState) {
    let (id, mut outbound) = state.viewers.register_channel(state.outbound_buffer);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = sender.send(to_ws_message(message)).await {
                    debug!(viewer = id, "Send failed, dropping viewer: {}", e);
                    break;
                }
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => trace!(viewer = id, "Ignoring inbound viewer message"),
                Some(Err(e)) => {
                    debug!(viewer = id, "Viewer socket error: {}", e);
                    break;
                }
            },
        }
    }

    state.viewers.unregister(id);
}

fn to_ws_message(message: Outbound) -> Message {
    match message {
        Outbound::Binary(bytes) => Message::Binary(bytes.to_vec()),
        Outbound::Text(text) => Message::Text(text.to_string()),
    }
}

/// Bound viewer endpoint, ready to serve
pub struct ViewerServer {
    listener: TcpListener,
    router: Router,
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl ViewerServer {
    /// Bind the configured address
    pub async fn bind(
        config: &ViewerConfig,
        viewers: BroadcastSink,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let requested = config.socket_addr()?;
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|e| RelayError::Bind { addr: requested.to_string(), source: e })?;
        let addr = listener
            .local_addr()
            .map_err(|e| RelayError::Bind { addr: requested.to_string(), source: e })?;

        let router = router(viewers, config.outbound_buffer, cancel.clone());
        Ok(Self { listener, router, addr, cancel })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the cancellation token fires
    pub async fn run(self) -> Result<()> {
        let Self { listener, router, addr, cancel } = self;
        info!("Viewer endpoint listening on ws://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| RelayError::Bind { addr: addr.to_string(), source: e })?;

        info!("Viewer endpoint stopped");
        Ok(())
    }
}
