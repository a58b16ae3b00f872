//! fleetcast-core: vehicle telemetry types and decoding.
//!
//! No async, no network I/O. Shared by the server's ingest path and its
//! tests; the only file access is the config loader.

pub mod config;
pub mod telemetry;
pub mod types;

pub use telemetry::decode;
pub use types::*;
