//! Domain models - core types shared by every layer
//!
//! - `types` - uplinks, observations, resolved access points, position estimates
//! - `mac` - access point identifier canonicalization (shared with the importer)

pub mod mac;
pub mod types;

// Re-export commonly used types at module level
pub use mac::canonical_mac;
pub use types::{
    AccessPointRecord, Coordinates, DeviceId, Observation, Payload, PositionEstimate,
    ResolvedAccessPoint, UplinkObservation,
};
