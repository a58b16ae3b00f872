//! Shared types and error enum for fleetcast-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by fleetcast-core.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("empty telemetry payload")]
    EmptyPayload,
    #[error("malformed telemetry payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("telemetry payload has an empty vehicle_id")]
    MissingVehicleId,
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;

/// One position report from a vehicle.
///
/// Constructed per inbound message and handed to persistence; the raw
/// payload it was decoded from is what viewers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    #[serde(alias = "bus_id")]
    pub vehicle_id: String,
    pub lat: f64,
    pub lng: f64,
}

impl LocationUpdate {
    pub fn new(vehicle_id: impl Into<String>, lat: f64, lng: f64) -> Self {
        LocationUpdate {
            vehicle_id: vehicle_id.into(),
            lat,
            lng,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(FleetError::EmptyPayload.to_string(), "empty telemetry payload");
        assert_eq!(
            FleetError::Config("bad port".into()).to_string(),
            "config error: bad port"
        );
    }

    #[test]
    fn test_location_update_serializes_wire_names() {
        let update = LocationUpdate::new("bus-42", 9.93, -84.08);
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["vehicle_id"], "bus-42");
        assert_eq!(value["lat"], 9.93);
        assert_eq!(value["lng"], -84.08);
    }
}
