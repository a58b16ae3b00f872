//! Telemetry payload decoding.
//!
//! Vehicles publish `{"vehicle_id": "...", "lat": 9.93, "lng": -84.08}`.
//! Older firmware sends `bus_id` instead of `vehicle_id`; both are accepted.
//! Coordinates are passed through untouched, range checks are left to
//! whatever stores them.

use crate::types::{FleetError, LocationUpdate, Result};

/// Decode a raw payload into a [`LocationUpdate`].
pub fn decode(payload: &[u8]) -> Result<LocationUpdate> {
    if payload.is_empty() {
        return Err(FleetError::EmptyPayload);
    }

    let update: LocationUpdate = serde_json::from_slice(payload)?;
    if update.vehicle_id.trim().is_empty() {
        return Err(FleetError::MissingVehicleId);
    }

    Ok(update)
}

/// Short printable preview of a payload for log lines.
pub fn preview(payload: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= max {
        return text.into_owned();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid() {
        let update = decode(br#"{"vehicle_id":"bus-42","lat":9.93,"lng":-84.08}"#).unwrap();
        assert_eq!(update.vehicle_id, "bus-42");
        assert_eq!(update.lat, 9.93);
        assert_eq!(update.lng, -84.08);
    }

    #[test]
    fn test_decode_legacy_bus_id() {
        let update = decode(br#"{"bus_id":"65f1c0","lat":1.5,"lng":2.5}"#).unwrap();
        assert_eq!(update.vehicle_id, "65f1c0");
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let update =
            decode(br#"{"vehicle_id":"v1","lat":0.0,"lng":0.0,"speed":12.5}"#).unwrap();
        assert_eq!(update.vehicle_id, "v1");
    }

    #[test]
    fn test_decode_no_range_validation() {
        let update = decode(br#"{"vehicle_id":"v1","lat":512.0,"lng":-999.0}"#).unwrap();
        assert_eq!(update.lat, 512.0);
        assert_eq!(update.lng, -999.0);
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(decode(b""), Err(FleetError::EmptyPayload)));
    }

    #[test]
    fn test_decode_not_json() {
        assert!(matches!(decode(b"{not json"), Err(FleetError::Malformed(_))));
    }

    #[test]
    fn test_decode_missing_coordinate() {
        assert!(matches!(
            decode(br#"{"vehicle_id":"v1","lat":1.0}"#),
            Err(FleetError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_blank_vehicle_id() {
        assert!(matches!(
            decode(br#"{"vehicle_id":"  ","lat":1.0,"lng":2.0}"#),
            Err(FleetError::MissingVehicleId)
        ));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(b"abcdef", 3), "abc...");
        assert_eq!(preview(b"abc", 3), "abc");
    }
}
