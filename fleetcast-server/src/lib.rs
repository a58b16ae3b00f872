//! fleetcast-server: live vehicle locations from MQTT to WebSocket viewers.
//!
//! ```text
//!  MQTT ──► Ingestor ──► LocationStore (detached write)
//!              │
//!              └──► HubHandle::publish ──► Hub ──► every /ws viewer
//! ```

pub mod db;
pub mod hub;
pub mod ingest;
pub mod logging;
pub mod mqtt;
pub mod web;

pub use db::{LocationStore, SqliteStore, StoreError};
pub use hub::{Connection, ConnectionId, Hub, HubHandle, PublishOutcome};
pub use ingest::{ChannelSource, InboundMessage, IngestStats, Ingestor, TelemetrySource};
