//! Signal-weighted centroid position estimation
//!
//! Each resolved access point contributes its surveyed coordinates with a
//! weight of `(clamp(rssi) + 120)^2`, where RSSI is clamped into
//! `[-120, -30]` dBm. The estimate is the weight-normalized mean of the
//! coordinates, per axis.
//!
//! This is a weighted centroid, not a geometric solve. With few or poorly
//! distributed access points the result is pulled toward their joint
//! location rather than the device's true position; accuracy scales with
//! the density of the surveyed repository.

use crate::domain::types::{PositionEstimate, ResolvedAccessPoint};
use chrono::{DateTime, Utc};

/// Weakest RSSI considered (weight 0)
pub const RSSI_FLOOR_DBM: f64 = -120.0;
/// Strongest RSSI considered (weight 8100)
pub const RSSI_CEILING_DBM: f64 = -30.0;

/// Why no position could be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoEstimateReason {
    /// No access point was resolved
    NoAccessPoints,
    /// Every access point clamped to the floor
    ZeroWeight,
}

impl NoEstimateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoEstimateReason::NoAccessPoints => "no_access_points",
            NoEstimateReason::ZeroWeight => "zero_weight",
        }
    }
}

/// Estimator output
#[derive(Debug, Clone, PartialEq)]
pub enum Estimate {
    Located(PositionEstimate),
    NoEstimate(NoEstimateReason),
}

/// Clamp a signal strength into the weighting range. NaN maps to the floor.
#[inline]
pub fn clamp_rssi(rssi: f64) -> f64 {
    if rssi.is_nan() {
        return RSSI_FLOOR_DBM;
    }
    rssi.clamp(RSSI_FLOOR_DBM, RSSI_CEILING_DBM)
}

/// Quadratic weight of a signal strength: 0 at the floor, 8100 at the ceiling
#[inline]
pub fn weight(rssi: f64) -> f64 {
    let offset = clamp_rssi(rssi) - RSSI_FLOOR_DBM;
    offset * offset
}

/// Stateless weighted-centroid estimator
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionEstimator;

impl PositionEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Estimate a position from resolved access points
    ///
    /// `aps_count` on the result is the number of access points passed in,
    /// including any that contributed zero weight.
    pub fn estimate(&self, aps: &[ResolvedAccessPoint], timestamp: DateTime<Utc>) -> Estimate {
        if aps.is_empty() {
            return Estimate::NoEstimate(NoEstimateReason::NoAccessPoints);
        }

        let total_weight: f64 = aps.iter().map(|ap| weight(ap.rssi)).sum();
        if total_weight <= 0.0 {
            return Estimate::NoEstimate(NoEstimateReason::ZeroWeight);
        }

        // Normalize first so a lone contributor reproduces its coordinates exactly
        let (lat, lon) = aps.iter().fold((0.0, 0.0), |(lat, lon), ap| {
            let share = weight(ap.rssi) / total_weight;
            (lat + ap.coords.lat * share, lon + ap.coords.lon * share)
        });

        tracing::trace!(
            aps = aps.len(),
            total_weight = total_weight,
            lat = lat,
            lon = lon,
            "centroid_computed"
        );

        Estimate::Located(PositionEstimate { lat, lon, timestamp, aps_count: aps.len() })
    }
}
