//! Broadcast hub — single owner of the live viewer connections.
//!
//! ```text
//!   HubHandle (cloned everywhere)                Hub::run (one task)
//!   ┌──────────────────────────┐   unbounded   ┌──────────────────────────┐
//!   │ register / unregister /  │ ────────────► │ members: HashMap<        │
//!   │ members                  │               │   ConnectionId,          │
//!   ├──────────────────────────┤   bounded     │   Box<dyn Connection>>   │
//!   │ publish (try_send)       │ ────────────► │ fan-out to every member  │
//!   └──────────────────────────┘               └──────────────────────────┘
//! ```
//!
//! The membership map lives inside the control loop and is never shared;
//! every change arrives as a message. Membership events and broadcasts come
//! from separate queues, each FIFO. When both are ready the loop drains
//! membership first, so a broadcast always sees registrations that were
//! enqueued before it.
//!
//! The flip side of that bias: a steady stream of membership events (a
//! reconnect storm, say) holds broadcasts back until it lets up. Broadcasts
//! are not lost while waiting, but the bounded queue can fill and drop.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Identity of one viewer connection. A reconnecting viewer gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure writing to a single connection.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("connection closed by peer")]
    Closed,
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound half of a viewer connection, owned by the hub once registered.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, payload: Bytes) -> Result<(), HubError>;

    /// Release the underlying transport. Called once, on unregistration.
    async fn close(&mut self);
}

/// Result of [`HubHandle::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// Broadcast queue was full; the payload was discarded.
    QueueFull,
    /// The control loop is gone; the payload was discarded.
    HubClosed,
}

impl PublishOutcome {
    pub fn is_dropped(self) -> bool {
        !matches!(self, PublishOutcome::Queued)
    }
}

enum Membership {
    Register(ConnectionId, Box<dyn Connection>),
    Unregister(ConnectionId),
    Members(oneshot::Sender<Vec<ConnectionId>>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable front door to the hub. All calls return immediately.
#[derive(Clone)]
pub struct HubHandle {
    membership_tx: mpsc::UnboundedSender<Membership>,
    broadcast_tx: mpsc::Sender<Bytes>,
}

impl HubHandle {
    /// Hand `conn` to the hub. Registering an id that is already a member
    /// is a no-op and the duplicate transport is closed.
    pub fn register(&self, id: ConnectionId, conn: Box<dyn Connection>) {
        if self
            .membership_tx
            .send(Membership::Register(id, conn))
            .is_err()
        {
            tracing::warn!(connection = %id, "Hub stopped, registration discarded");
        }
    }

    /// Register and return a guard that unregisters on drop.
    pub fn register_scoped(&self, id: ConnectionId, conn: Box<dyn Connection>) -> Registration {
        self.register(id, conn);
        Registration {
            hub: self.clone(),
            id,
        }
    }

    /// Remove `id` and close its transport. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        // A stopped hub has already released every transport.
        let _ = self.membership_tx.send(Membership::Unregister(id));
    }

    /// Queue `payload` for every current member without waiting.
    pub fn publish(&self, payload: impl Into<Bytes>) -> PublishOutcome {
        match self.broadcast_tx.try_send(payload.into()) {
            Ok(()) => PublishOutcome::Queued,
            Err(TrySendError::Full(_)) => PublishOutcome::QueueFull,
            Err(TrySendError::Closed(_)) => PublishOutcome::HubClosed,
        }
    }

    /// Snapshot of the membership set, answered by the control loop.
    pub async fn members(&self) -> Vec<ConnectionId> {
        let (tx, rx) = oneshot::channel();
        if self.membership_tx.send(Membership::Members(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.members().await.len()
    }
}

/// Keeps a connection registered for as long as it is alive.
///
/// Dropping it, on any exit path including unwinding, sends exactly one
/// unregister for the connection.
pub struct Registration {
    hub: HubHandle,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

pub struct Hub {
    members: HashMap<ConnectionId, Box<dyn Connection>>,
    membership_rx: mpsc::UnboundedReceiver<Membership>,
    broadcast_rx: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
}

impl Hub {
    /// Create the hub and its handle. `capacity` bounds the broadcast queue
    /// (minimum 1). Nothing is processed until [`Hub::run`] is polled.
    pub fn new(capacity: usize, write_timeout: Duration) -> (Hub, HubHandle) {
        let (membership_tx, membership_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity.max(1));

        let hub = Hub {
            members: HashMap::new(),
            membership_rx,
            broadcast_rx,
            write_timeout,
        };
        let handle = HubHandle {
            membership_tx,
            broadcast_tx,
        };
        (hub, handle)
    }

    /// Run until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        tracing::debug!(write_timeout_ms = self.write_timeout.as_millis() as u64, "Hub running");

        loop {
            tokio::select! {
                biased;

                event = self.membership_rx.recv() => match event {
                    Some(event) => self.apply(event).await,
                    None => break,
                },
                payload = self.broadcast_rx.recv() => match payload {
                    Some(payload) => self.broadcast(payload).await,
                    None => break,
                },
            }
        }

        for (_, mut conn) in self.members.drain() {
            conn.close().await;
        }
        tracing::debug!("Hub stopped");
    }

    async fn apply(&mut self, event: Membership) {
        match event {
            Membership::Register(id, mut conn) => {
                if self.members.contains_key(&id) {
                    tracing::debug!(connection = %id, "Duplicate registration ignored");
                    conn.close().await;
                    return;
                }
                self.members.insert(id, conn);
                tracing::info!(connection = %id, members = self.members.len(), "Viewer registered");
            }
            Membership::Unregister(id) => self.remove(id).await,
            Membership::Members(reply) => {
                let _ = reply.send(self.members.keys().copied().collect());
            }
        }
    }

    async fn remove(&mut self, id: ConnectionId) {
        if let Some(mut conn) = self.members.remove(&id) {
            conn.close().await;
            tracing::info!(connection = %id, members = self.members.len(), "Viewer unregistered");
        }
    }

    async fn broadcast(&mut self, payload: Bytes) {
        let timeout = self.write_timeout;

        let writes = self.members.iter_mut().map(|(id, conn)| {
            let payload = payload.clone();
            async move {
                let result = match tokio::time::timeout(timeout, conn.send(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(HubError::Timeout(timeout)),
                };
                (*id, result)
            }
        });

        let failed: Vec<(ConnectionId, HubError)> = join_all(writes)
            .await
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .collect();

        for (id, err) in failed {
            tracing::warn!(connection = %id, error = %err, "Write failed, evicting viewer");
            self.remove(id).await;
        }

        tracing::trace!(bytes = payload.len(), members = self.members.len(), "Broadcast delivered");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
