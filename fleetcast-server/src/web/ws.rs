//! WebSocket viewers — upgrade, register with the hub, wait for the peer to leave.
//!
//! The hub owns the write half and does all sending. This side only reads,
//! to notice when the peer is gone, and waits for the hub's eviction signal
//! so a viewer the hub gave up on releases its socket too.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;

use crate::hub::{Connection, ConnectionId, HubError, HubHandle};
use crate::web::AppState;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Write half of an accepted WebSocket, handed to the hub.
pub struct WsConnection {
    sink: SplitSink<WebSocket, Message>,
    evicted: Option<oneshot::Sender<()>>,
}

impl WsConnection {
    /// Pair a write half with the receiver its read loop waits on.
    pub fn new(sink: SplitSink<WebSocket, Message>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink,
                evicted: Some(tx),
            },
            rx,
        )
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, payload: Bytes) -> Result<(), HubError> {
        let message = match std::str::from_utf8(&payload) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(payload.to_vec()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.sink.close()).await;
        // The read loop may already be gone if the peer left first.
        if let Some(evicted) = self.evicted.take() {
            let _ = evicted.send(());
        }
    }
}

/// GET /ws — upgrade to a live location stream.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "WebSocket upgrade failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("WebSocket error: {rejection}"),
            )
                .into_response();
        }
    };

    let hub = state.hub.clone();
    upgrade
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket handshake failed"))
        .on_upgrade(move |socket| serve_socket(socket, hub))
}

/// Register `socket` with the hub and hold it until the peer goes away or
/// the hub evicts it. Returning drops the read half; once the hub has dropped
/// the write half as well, the socket is released.
pub async fn serve_socket(socket: WebSocket, hub: HubHandle) {
    let (sink, mut stream) = socket.split();
    let (connection, mut evicted) = WsConnection::new(sink);
    let id = ConnectionId::new();
    let _registration = hub.register_scoped(id, Box::new(connection));

    loop {
        tokio::select! {
            _ = &mut evicted => {
                tracing::debug!(connection = %id, "Viewer evicted by hub");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(connection = %id, "Viewer closed the stream");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Viewer read failed");
                    break;
                }
            },
        }
    }
}
