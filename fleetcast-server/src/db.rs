//! Location persistence — the `LocationStore` contract and its SQLite backend.
//!
//! Schema: vehicles, locations. A location may only be recorded for a
//! vehicle that already exists.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type RecordId = Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vehicle {0} does not exist")]
    VehicleNotFound(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Durable sink for location reports.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn record_location(
        &self,
        vehicle_id: &str,
        lat: f64,
        lng: f64,
    ) -> Result<RecordId, StoreError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vehicles (
    id TEXT PRIMARY KEY,
    label TEXT,
    created_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS locations (
    id TEXT PRIMARY KEY,
    vehicle_id TEXT NOT NULL REFERENCES vehicles(id),
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    created_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_locations_vehicle ON locations(vehicle_id, created_at);
"#;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// SQLite-backed store. Holds only the path; every call opens its own
/// connection so the store can be shared freely across tasks.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: String,
}

impl SqliteStore {
    /// Open or create a database at the given path and apply the schema.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let store = SqliteStore {
            path: path.to_string(),
        };
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Vehicles
    // -----------------------------------------------------------------------

    /// Add a vehicle. Returns false if it was already known.
    pub fn add_vehicle(&self, id: &str, label: Option<&str>) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO vehicles (id, label, created_at) VALUES (?1, ?2, ?3)",
            params![id, label, now()],
        )?;
        Ok(inserted > 0)
    }

    pub fn vehicle_exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        Ok(vehicle_exists(&conn, id)?)
    }

    pub fn list_vehicles(&self) -> Result<Vec<VehicleRow>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.label, v.created_at, COUNT(l.id), MAX(l.created_at)
             FROM vehicles v LEFT JOIN locations l ON l.vehicle_id = v.id
             GROUP BY v.id ORDER BY v.id",
        )?;

        let rows = stmt
            .query_map([], |r| {
                Ok(VehicleRow {
                    id: r.get(0)?,
                    label: r.get(1)?,
                    created_at: r.get(2)?,
                    locations: r.get(3)?,
                    last_seen: r.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Locations
    // -----------------------------------------------------------------------

    /// Blocking insert. Fails with `VehicleNotFound` for unknown vehicles.
    pub fn insert_location(
        &self,
        vehicle_id: &str,
        lat: f64,
        lng: f64,
    ) -> Result<RecordId, StoreError> {
        let conn = self.connect()?;
        if !vehicle_exists(&conn, vehicle_id)? {
            return Err(StoreError::VehicleNotFound(vehicle_id.to_string()));
        }

        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO locations (id, vehicle_id, lat, lng, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), vehicle_id, lat, lng, now()],
        )?;
        Ok(id)
    }

    /// Most recent locations for one vehicle, newest first.
    pub fn recent_locations(
        &self,
        vehicle_id: &str,
        limit: i64,
    ) -> Result<Vec<LocationRow>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, vehicle_id, lat, lng, created_at FROM locations
             WHERE vehicle_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![vehicle_id, limit], |r| {
                Ok(LocationRow {
                    id: r.get(0)?,
                    vehicle_id: r.get(1)?,
                    lat: r.get(2)?,
                    lng: r.get(3)?,
                    created_at: r.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.connect()?;
        Ok(StoreStats {
            vehicles: conn.query_row("SELECT COUNT(*) FROM vehicles", [], |r| r.get(0))?,
            locations: conn.query_row("SELECT COUNT(*) FROM locations", [], |r| r.get(0))?,
        })
    }
}

fn vehicle_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM vehicles WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

#[async_trait]
impl LocationStore for SqliteStore {
    async fn record_location(
        &self,
        vehicle_id: &str,
        lat: f64,
        lng: f64,
    ) -> Result<RecordId, StoreError> {
        let store = self.clone();
        let vehicle_id = vehicle_id.to_string();
        tokio::task::spawn_blocking(move || store.insert_location(&vehicle_id, lat, lng)).await?
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct VehicleRow {
    pub id: String,
    pub label: Option<String>,
    pub created_at: f64,
    pub locations: i64,
    pub last_seen: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct LocationRow {
    pub id: String,
    pub vehicle_id: String,
    pub lat: f64,
    pub lng: f64,
    pub created_at: f64,
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub vehicles: i64,
    pub locations: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
