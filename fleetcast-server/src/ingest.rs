//! Ingestion adapter — broker messages in, storage writes and hub broadcasts out.
//!
//! Every inbound message is handled on its own: decode, start the storage
//! write as a detached task, then publish the untouched payload to the hub.
//! A bad message, a failed write, or a full hub queue is logged and counted;
//! none of them stop the receive loop.
//!
//! Storage writes in flight are capped at `MAX_PENDING_WRITES`. When the
//! store is slower than the broker, the overflow is counted as
//! `persist_dropped` and skipped; broadcasting carries on regardless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use fleetcast_core::telemetry;
use fleetcast_core::types::{FleetError, LocationUpdate};

use crate::db::LocationStore;
use crate::hub::{HubHandle, PublishOutcome};

/// Storage writes allowed in flight before new ones are skipped.
pub const MAX_PENDING_WRITES: usize = 256;

/// One message as delivered by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Anything that yields broker messages one at a time.
#[async_trait]
pub trait TelemetrySource: Send {
    /// Wait for the next message. `None` means the source is finished for good.
    async fn next_message(&mut self) -> Option<InboundMessage>;
}

/// In-process source fed through an mpsc channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundMessage>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<InboundMessage>, ChannelSource) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, ChannelSource { rx })
    }
}

#[async_trait]
impl TelemetrySource for ChannelSource {
    async fn next_message(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    empty: AtomicU64,
    decode_errors: AtomicU64,
    persisted: AtomicU64,
    persist_errors: AtomicU64,
    persist_dropped: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub received: u64,
    pub empty: u64,
    pub decode_errors: u64,
    pub persisted: u64,
    pub persist_errors: u64,
    pub persist_dropped: u64,
    pub published: u64,
    pub dropped: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            persist_dropped: self.persist_dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// What happened to one inbound message.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Bare payload, skipped.
    Empty,
    /// Payload could not be decoded; nothing was stored or published.
    Rejected(FleetError),
    Accepted {
        vehicle_id: String,
        publish: PublishOutcome,
        /// The detached storage write, or `None` if it was skipped because
        /// too many writes were already pending. Callers normally let it run.
        persistence: Option<JoinHandle<()>>,
    },
}

pub struct Ingestor {
    store: Arc<dyn LocationStore>,
    hub: HubHandle,
    stats: Arc<IngestStats>,
    write_permits: Arc<Semaphore>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn LocationStore>, hub: HubHandle) -> Self {
        Self::with_write_limit(store, hub, MAX_PENDING_WRITES)
    }

    pub fn with_write_limit(store: Arc<dyn LocationStore>, hub: HubHandle, limit: usize) -> Self {
        Ingestor {
            store,
            hub,
            stats: Arc::new(IngestStats::default()),
            write_permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Handle one message. Must be called from within a Tokio runtime.
    pub fn handle(&self, message: &InboundMessage) -> IngestOutcome {
        bump(&self.stats.received);

        if message.payload.is_empty() {
            bump(&self.stats.empty);
            tracing::debug!(topic = %message.topic, "Empty payload skipped");
            return IngestOutcome::Empty;
        }

        let update = match telemetry::decode(&message.payload) {
            Ok(update) => update,
            Err(e) => {
                bump(&self.stats.decode_errors);
                tracing::warn!(
                    topic = %message.topic,
                    error = %e,
                    payload = %telemetry::preview(&message.payload, 120),
                    "Undecodable telemetry skipped"
                );
                return IngestOutcome::Rejected(e);
            }
        };

        tracing::debug!(
            topic = %message.topic,
            vehicle = %update.vehicle_id,
            lat = update.lat,
            lng = update.lng,
            "Location received"
        );

        let vehicle_id = update.vehicle_id.clone();
        let persistence = self.persist(update);

        let publish = self.hub.publish(message.payload.clone());
        if publish.is_dropped() {
            bump(&self.stats.dropped);
            tracing::warn!(vehicle = %vehicle_id, outcome = ?publish, "Broadcast dropped");
        } else {
            bump(&self.stats.published);
        }

        IngestOutcome::Accepted {
            vehicle_id,
            publish,
            persistence,
        }
    }

    fn persist(&self, update: LocationUpdate) -> Option<JoinHandle<()>> {
        let permit = match Arc::clone(&self.write_permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                bump(&self.stats.persist_dropped);
                tracing::warn!(vehicle = %update.vehicle_id, "Storage backlog full, location not stored");
                return None;
            }
        };
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);

        Some(tokio::spawn(async move {
            let _permit = permit;
            match store
                .record_location(&update.vehicle_id, update.lat, update.lng)
                .await
            {
                Ok(id) => {
                    bump(&stats.persisted);
                    tracing::debug!(vehicle = %update.vehicle_id, record = %id, "Location stored");
                }
                Err(e) => {
                    bump(&stats.persist_errors);
                    tracing::warn!(vehicle = %update.vehicle_id, error = %e, "Failed to store location");
                }
            }
        }))
    }

    /// Drain `source` until it ends.
    pub async fn run<S: TelemetrySource>(self, mut source: S) {
        tracing::info!("Ingestion started");
        while let Some(message) = source.next_message().await {
            let _ = self.handle(&message);
        }
        tracing::info!(stats = ?self.stats.snapshot(), "Telemetry source ended");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
