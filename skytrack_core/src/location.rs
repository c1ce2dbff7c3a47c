//! Location data model shared by the store, the engine and the HTTP layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Session namespace used when a client does not identify itself.
///
/// Trackers recorded under this session are visible to every session
/// (see `LocationStore::list_tracker_ids`).
pub const GLOBAL_SESSION: &str = "global";

/// Input validation errors, raised before any side effect.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("trackerId must not be empty")]
    EmptyTrackerId,

    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("coordinate is not a finite number")]
    NonFiniteCoordinate,
}

/// Delivery lifecycle of a tracker, as reported in each record.
///
/// A tracker stays `Moving` while en route regardless of obstacle presence;
/// only arrival sets `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Moving,
    Delivered,
}

/// Transient hazard affecting a flight across consecutive ticks.
///
/// Wind halves the step fraction; fire forces a positional detour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObstacleType {
    #[default]
    None,
    Wind,
    Fire,
}

impl ObstacleType {
    pub fn is_none(&self) -> bool {
        matches!(self, ObstacleType::None)
    }
}

/// One immutable, append-only position sample for a (tracker, session) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    /// Logical identifier of the simulated drone
    pub tracker_id: String,

    /// Tenant scope; defaults to [`GLOBAL_SESSION`]
    pub session_id: String,

    /// Degrees, validated to [-90, 90]
    pub latitude: f64,

    /// Degrees, validated to [-180, 180]
    pub longitude: f64,

    /// Meters
    pub altitude: f64,

    /// Degrees in [0, 360)
    pub heading: f64,

    pub status: DeliveryStatus,

    pub obstacle_type: ObstacleType,

    /// Unix milliseconds, strictly increasing per (tracker, session) key.
    /// Assigned by the store on append.
    pub created_at: u64,
}

/// Registry and store key: one simulation task / record stream per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerKey {
    pub session_id: String,
    pub tracker_id: String,
}

impl TrackerKey {
    pub fn new(tracker_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tracker_id: tracker_id.into(),
        }
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.tracker_id)
    }
}

/// Checks that a tracker id is usable as a key.
pub fn validate_tracker_id(tracker_id: &str) -> Result<(), ValidationError> {
    if tracker_id.is_empty() {
        return Err(ValidationError::EmptyTrackerId);
    }
    Ok(())
}

/// Checks that a coordinate pair is finite and in geographic range.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ValidationError> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(ValidationError::NonFiniteCoordinate);
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::LatitudeOutOfRange(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::LongitudeOutOfRange(longitude));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tracker_id() {
        assert!(validate_tracker_id("d1").is_ok());
        assert!(matches!(
            validate_tracker_id(""),
            Err(ValidationError::EmptyTrackerId)
        ));
    }

    #[test]
    fn test_validate_coordinates_ranges() {
        assert!(validate_coordinates(53.2407722, 6.5357325).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        assert!(matches!(
            validate_coordinates(90.5, 0.0),
            Err(ValidationError::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            validate_coordinates(0.0, -180.5),
            Err(ValidationError::LongitudeOutOfRange(_))
        ));
        assert!(matches!(
            validate_coordinates(f64::NAN, 0.0),
            Err(ValidationError::NonFiniteCoordinate)
        ));
        assert!(matches!(
            validate_coordinates(0.0, f64::INFINITY),
            Err(ValidationError::NonFiniteCoordinate)
        ));
    }

    #[test]
    fn test_record_wire_format_is_camel_case() {
        let record = LocationRecord {
            tracker_id: "d1".into(),
            session_id: GLOBAL_SESSION.into(),
            latitude: 53.23,
            longitude: 6.54,
            altitude: 31.5,
            heading: 12.0,
            status: DeliveryStatus::Moving,
            obstacle_type: ObstacleType::Wind,
            created_at: 1_700_000_000_000,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["trackerId"], "d1");
        assert_eq!(json["obstacleType"], "wind");
        assert_eq!(json["status"], "moving");
        assert_eq!(json["createdAt"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_tracker_key_display() {
        let key = TrackerKey::new("d1", "s1");
        assert_eq!(key.to_string(), "s1:d1");
    }
}
