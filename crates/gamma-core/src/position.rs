//! Position fix cache types.
//!
//! The position worker continuously overwrites a single [`PositionFix`]
//! from buffered source samples. Each sample field is optional; a missing
//! or non-finite value leaves the previous reading in place, so the fix
//! always holds the last known good value per field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last known position, velocity, and accuracy estimates.
///
/// Read as an atomic snapshot under the position cache lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PositionFix {
    pub latitude: f64,
    /// Latitude error estimate in meters
    pub latitude_error: f64,
    pub longitude: f64,
    /// Longitude error estimate in meters
    pub longitude_error: f64,
    /// Altitude in meters
    pub altitude: f64,
    pub altitude_error: f64,
    /// Course over ground in degrees from true north
    pub track: f64,
    pub track_error: f64,
    /// Speed over ground in m/s
    pub speed: f64,
    pub speed_error: f64,
    /// Vertical velocity in m/s
    pub climb: f64,
    pub climb_error: f64,
    /// UTC timestamp of the most recent sample, if any arrived yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

/// One raw sample from a position source.
///
/// Every field is optional: sources report only what they measured, and
/// non-finite values are treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PositionSample {
    pub latitude: Option<f64>,
    pub latitude_error: Option<f64>,
    pub longitude: Option<f64>,
    pub longitude_error: Option<f64>,
    pub altitude: Option<f64>,
    pub altitude_error: Option<f64>,
    pub track: Option<f64>,
    pub track_error: Option<f64>,
    pub speed: Option<f64>,
    pub speed_error: Option<f64>,
    pub climb: Option<f64>,
    pub climb_error: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

/// Overwrites `field` with `value` only when the sample carries a
/// finite number.
fn merge(field: &mut f64, value: Option<f64>) {
    if let Some(v) = value {
        if v.is_finite() {
            *field = v;
        }
    }
}

impl PositionFix {
    /// Merges one sample into the fix, keeping previous values for any
    /// field the sample does not carry (or carries as NaN/inf).
    pub fn apply(&mut self, sample: &PositionSample) {
        merge(&mut self.latitude, sample.latitude);
        merge(&mut self.latitude_error, sample.latitude_error);
        merge(&mut self.longitude, sample.longitude);
        merge(&mut self.longitude_error, sample.longitude_error);
        merge(&mut self.altitude, sample.altitude);
        merge(&mut self.altitude_error, sample.altitude_error);
        merge(&mut self.track, sample.track);
        merge(&mut self.track_error, sample.track_error);
        merge(&mut self.speed, sample.speed);
        merge(&mut self.speed_error, sample.speed_error);
        merge(&mut self.climb, sample.climb);
        merge(&mut self.climb_error, sample.climb_error);
        if sample.time.is_some() {
            self.time = sample.time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overwrites_reported_fields() {
        let mut fix = PositionFix::default();
        fix.apply(&PositionSample {
            latitude: Some(59.95),
            longitude: Some(10.6),
            altitude: Some(120.0),
            ..Default::default()
        });
        assert_eq!(fix.latitude, 59.95);
        assert_eq!(fix.longitude, 10.6);
        assert_eq!(fix.altitude, 120.0);
        assert_eq!(fix.speed, 0.0);
    }

    #[test]
    fn test_apply_keeps_previous_on_missing_field() {
        let mut fix = PositionFix {
            latitude: 59.95,
            longitude: 10.6,
            ..Default::default()
        };
        fix.apply(&PositionSample {
            longitude: Some(10.7),
            ..Default::default()
        });
        assert_eq!(fix.latitude, 59.95);
        assert_eq!(fix.longitude, 10.7);
    }

    #[test]
    fn test_apply_ignores_non_finite_values() {
        let mut fix = PositionFix {
            latitude: 59.95,
            ..Default::default()
        };
        fix.apply(&PositionSample {
            latitude: Some(f64::NAN),
            altitude: Some(f64::INFINITY),
            ..Default::default()
        });
        assert_eq!(fix.latitude, 59.95);
        assert_eq!(fix.altitude, 0.0);
    }

    #[test]
    fn test_apply_keeps_previous_timestamp() {
        let t0 = Utc::now();
        let mut fix = PositionFix {
            time: Some(t0),
            ..Default::default()
        };
        fix.apply(&PositionSample::default());
        assert_eq!(fix.time, Some(t0));
    }
}
