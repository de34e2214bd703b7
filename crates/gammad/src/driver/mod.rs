//! Detector driver interface and static driver registry.
//!
//! Drivers wrap a vendor SDK behind a synchronous trait; all calls may
//! block (an acquisition blocks for up to the requested livetime) and are
//! therefore run on `tokio::task::spawn_blocking` by the spectrometer
//! worker, with the handle guarded by one `std::sync::Mutex` so a
//! concurrent `set_gain` serializes against an in-flight acquisition.
//!
//! Drivers are selected from a static registry keyed by name rather than
//! resolved as runtime plugins, so an unknown detector type fails at
//! configuration time with a typed error.

mod sim;

pub use sim::{FaultHandle, SimDetector};

use gamma_core::{AcquisitionRequest, DetectorConfig, DriverError, SpectralData};

/// Vendor-facing detector interface.
///
/// Implementations must be safely re-callable: a failed `configure` or
/// `acquire` leaves the driver usable for the next attempt.
pub trait DetectorDriver: Send {
    /// Applies a detector configuration. Blocking.
    fn configure(&mut self, config: &DetectorConfig) -> Result<(), DriverError>;

    /// Runs one acquisition, blocking for up to the requested livetime
    /// plus bounded polling overhead.
    fn acquire(&mut self, request: &AcquisitionRequest) -> Result<SpectralData, DriverError>;

    /// Returns true if the probe reports a stabilized bias voltage.
    fn probe_stabilized(&mut self) -> Result<bool, DriverError>;

    /// Sets the bias voltage and starts the ramp.
    fn set_high_voltage(&mut self, voltage: u32) -> Result<(), DriverError>;

    /// Returns true while the bias voltage is still ramping.
    fn is_ramping(&mut self) -> Result<bool, DriverError>;

    /// Applies amplifier gain. Only safe once ramping has completed.
    fn apply_gain(&mut self, coarse: f64, fine: f64) -> Result<(), DriverError>;
}

impl std::fmt::Debug for dyn DetectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DetectorDriver")
    }
}

/// Creates a driver from the static registry.
pub fn create(kind: &str) -> Result<Box<dyn DetectorDriver>, DriverError> {
    match kind {
        "sim" => Ok(Box::new(SimDetector::new())),
        other => Err(DriverError::UnknownDetector {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_sim() {
        assert!(create("sim").is_ok());
    }

    #[test]
    fn test_registry_rejects_unknown() {
        let err = create("osprey").unwrap_err();
        assert!(matches!(err, DriverError::UnknownDetector { .. }));
        assert!(err.to_string().contains("osprey"));
    }
}
