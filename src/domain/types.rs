//! Shared types for the geolocation pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Newtype wrapper for end device IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surveyed position of an access point, decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True if both axes are finite and inside the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// One row of the `access_points` table
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPointRecord {
    /// Canonical identifier (see `domain::mac::canonical_mac`)
    pub mac: String,
    pub coords: Coordinates,
    pub ssid: Option<String>,
    pub first_seen: Option<String>,
}

/// Uplink payload as delivered by the network server.
///
/// Exactly one variant is selected per uplink; the structured form wins when
/// both are present.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Fields produced by the network server's payload formatter (`mac_1`, `rssi_1`, ...)
    Structured(Map<String, Value>),
    /// Base64-encoded FRMPayload bytes
    Raw(String),
}

/// A single uplink as seen by the pipeline
#[derive(Debug, Clone)]
pub struct UplinkObservation {
    pub device_id: DeviceId,
    pub received_at: DateTime<Utc>,
    pub payload: Option<Payload>,
}

impl UplinkObservation {
    pub fn new(device_id: DeviceId, payload: Option<Payload>) -> Self {
        Self { device_id, received_at: Utc::now(), payload }
    }
}

/// An access point heard by the device
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Identifier as reported; canonicalized only at lookup time
    pub mac: String,
    /// Signal strength in dBm, fractional when the formatter reports one
    pub rssi: f64,
}

impl Observation {
    pub fn new(mac: impl Into<String>, rssi: impl Into<f64>) -> Self {
        Self { mac: mac.into(), rssi: rssi.into() }
    }
}

/// An observation joined with its surveyed coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAccessPoint {
    pub mac: String,
    pub coords: Coordinates,
    pub rssi: f64,
}

/// A single position fix, as exposed by the history feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionEstimate {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    pub aps_count: usize,
}
