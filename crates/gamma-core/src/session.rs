//! Session bookkeeping: parameters, and the consecutive-failure counter
//! that forces a session stop after repeated acquisition faults.

use crate::detector::DetectorConfig;
use serde::{Deserialize, Serialize};

/// Number of consecutive acquisition failures that forces a session stop.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Parameters of one measurement session.
///
/// Created by `start_session` and held by the spectrometer worker for the
/// lifetime of the session. The detector config is snapshotted so a later
/// `detector_config` (rejected while busy anyway) can never retroactively
/// change what a stored spectrum claims it was measured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Operator-chosen session name, used as the persistence key
    pub name: String,

    /// Free-text operator comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Requested livetime per acquisition in seconds
    pub livetime: f64,

    /// Detector configuration in effect when the session started,
    /// if one had been applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_config: Option<DetectorConfig>,
}

/// Counts consecutive acquisition failures within one session.
///
/// Reset at `start_session`; one success resets the run. Reaching
/// [`MAX_CONSECUTIVE_FAILURES`] signals that the session must be stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounter {
    consecutive: u32,
}

impl FailureCounter {
    /// Creates a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failed acquisition. Returns true when the failure
    /// threshold has been reached and the session must stop.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive >= MAX_CONSECUTIVE_FAILURES
    }

    /// Records one successful acquisition, breaking the failure run.
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Resets the counter (at `start_session`).
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Current consecutive failure count.
    pub fn count(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter_trips_at_threshold() {
        let mut counter = FailureCounter::new();
        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
        assert_eq!(counter.count(), 3);
    }

    #[test]
    fn test_success_breaks_failure_run() {
        let mut counter = FailureCounter::new();
        counter.record_failure();
        counter.record_failure();
        counter.record_success();
        assert_eq!(counter.count(), 0);
        assert!(!counter.record_failure());
    }

    #[test]
    fn test_reset_clears_count() {
        let mut counter = FailureCounter::new();
        counter.record_failure();
        counter.reset();
        assert_eq!(counter.count(), 0);
    }
}
