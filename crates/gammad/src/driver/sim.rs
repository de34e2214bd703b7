//! Simulated scintillation detector.
//!
//! Produces a synthetic pulse-height histogram: Poisson background falling
//! off with channel number plus Gaussian photopeaks (Cs-137 and K-40 at
//! fixed channel fractions). The acquisition honours the requested
//! livetime by sleeping for it, and reports a dead-time-inflated realtime,
//! so timing-sensitive behaviour can be exercised without hardware.
//!
//! A [`FaultHandle`] lets tests inject consecutive acquisition failures.

use super::DetectorDriver;
use gamma_core::{AcquisitionRequest, DetectorConfig, DriverError, SpectralData};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Poisson};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Background events per second of livetime.
const BACKGROUND_RATE: f64 = 2000.0;

/// Photopeak events per second of livetime.
const PEAK_RATE: f64 = 400.0;

/// Fraction of realtime lost to dead time.
const DEAD_TIME_FRACTION: f64 = 0.02;

/// Number of `is_ramping` polls before the simulated HV settles.
const RAMP_POLLS: u32 = 2;

/// Combined gain at which the peak channel fractions are calibrated.
const NOMINAL_GAIN: f64 = 1.375;

/// Photopeaks as (channel fraction, relative width, relative intensity).
/// Channel fractions put Cs-137 at 662 keV and K-40 at 1461 keV on a
/// 3 MeV full-scale calibration.
const PEAKS: [(f64, f64, f64); 2] = [(0.22, 0.015, 1.0), (0.49, 0.02, 0.35)];

/// Test handle for injecting acquisition faults.
#[derive(Clone, Default)]
pub struct FaultHandle {
    pending: Arc<AtomicU32>,
}

impl FaultHandle {
    /// Makes the next `count` acquisitions fail.
    pub fn fail_next(&self, count: u32) {
        self.pending.store(count, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Simulated detector driver.
pub struct SimDetector {
    config: Option<DetectorConfig>,
    stabilized: bool,
    ramp_polls_left: u32,
    voltage: Option<u32>,
    gain: Option<(f64, f64)>,
    faults: FaultHandle,
    rng: SmallRng,
}

impl SimDetector {
    /// Creates a simulated detector with entropy seeding.
    pub fn new() -> Self {
        Self {
            config: None,
            stabilized: false,
            ramp_polls_left: 0,
            voltage: None,
            gain: None,
            faults: FaultHandle::default(),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Returns the fault-injection handle for tests.
    pub fn fault_handle(&self) -> FaultHandle {
        self.faults.clone()
    }

    fn synthesize(&mut self, num_channels: usize, livetime: f64) -> Vec<u32> {
        let mut channels = vec![0u32; num_channels];

        // Background: exponentially falling continuum.
        for (i, counts) in channels.iter_mut().enumerate() {
            let fraction = i as f64 / num_channels as f64;
            let lambda = (BACKGROUND_RATE * livetime / num_channels as f64)
                * (-3.0 * fraction).exp().max(1e-6);
            if let Ok(poisson) = Poisson::new(lambda) {
                *counts = poisson.sample(&mut self.rng) as u32;
            }
        }

        // Photopeaks: Gaussian-distributed events around each peak channel.
        // Amplifier gain shifts the peaks linearly, as it does on hardware.
        let gain_factor = self
            .gain
            .map(|(coarse, fine)| (coarse * fine) / NOMINAL_GAIN)
            .unwrap_or(1.0);
        for (center_fraction, width_fraction, intensity) in PEAKS {
            let mu = center_fraction * gain_factor * num_channels as f64;
            let sigma = width_fraction * num_channels as f64;
            let expected = PEAK_RATE * livetime * intensity;

            let events = match Poisson::new(expected.max(1e-6)) {
                Ok(poisson) => poisson.sample(&mut self.rng) as u64,
                Err(_) => 0,
            };
            let Ok(normal) = Normal::new(mu, sigma) else {
                continue;
            };
            for _ in 0..events {
                let channel = normal.sample(&mut self.rng).round();
                if channel >= 0.0 && (channel as usize) < num_channels {
                    if let Some(c) = channels.get_mut(channel as usize) {
                        *c = c.saturating_add(1);
                    }
                }
            }
        }

        channels
    }
}

impl Default for SimDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorDriver for SimDetector {
    fn configure(&mut self, config: &DetectorConfig) -> Result<(), DriverError> {
        config
            .validate()
            .map_err(|reason| DriverError::InvalidConfig { reason })?;
        self.config = Some(config.clone());
        self.voltage = Some(config.voltage);
        self.gain = Some((config.coarse_gain, config.fine_gain));
        self.stabilized = true;
        Ok(())
    }

    fn acquire(&mut self, request: &AcquisitionRequest) -> Result<SpectralData, DriverError> {
        if self.faults.take_fault() {
            return Err(DriverError::Hardware {
                reason: "simulated acquisition fault".to_string(),
            });
        }

        let num_channels = self
            .config
            .as_ref()
            .ok_or(DriverError::NotConfigured)?
            .num_channels as usize;

        std::thread::sleep(Duration::from_secs_f64(request.livetime.max(0.0)));
        let channels = self.synthesize(num_channels, request.livetime);

        let realtime = request.livetime * (1.0 + DEAD_TIME_FRACTION);
        Ok(SpectralData::from_channels(
            channels,
            request.livetime,
            realtime,
        ))
    }

    fn probe_stabilized(&mut self) -> Result<bool, DriverError> {
        Ok(self.stabilized)
    }

    fn set_high_voltage(&mut self, voltage: u32) -> Result<(), DriverError> {
        self.voltage = Some(voltage);
        self.ramp_polls_left = RAMP_POLLS;
        Ok(())
    }

    fn is_ramping(&mut self) -> Result<bool, DriverError> {
        if self.ramp_polls_left > 0 {
            self.ramp_polls_left -= 1;
            Ok(true)
        } else {
            self.stabilized = true;
            Ok(false)
        }
    }

    fn apply_gain(&mut self, coarse: f64, fine: f64) -> Result<(), DriverError> {
        if self.voltage.is_none() {
            return Err(DriverError::InvalidConfig {
                reason: "gain applied before high voltage was set".to_string(),
            });
        }
        self.gain = Some((coarse, fine));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectorConfig {
        DetectorConfig {
            voltage: 775,
            coarse_gain: 1.0,
            fine_gain: 1.375,
            num_channels: 256,
            lld: 3,
            uld: 110,
            detector_type: None,
        }
    }

    fn request() -> AcquisitionRequest {
        AcquisitionRequest {
            session_name: "test".to_string(),
            livetime: 0.01,
        }
    }

    #[test]
    fn test_acquire_requires_configuration() {
        let mut detector = SimDetector::new();
        let err = detector.acquire(&request()).unwrap_err();
        assert!(matches!(err, DriverError::NotConfigured));
    }

    #[test]
    fn test_spectrum_shape() {
        let mut detector = SimDetector::new();
        detector.configure(&config()).unwrap();
        let data = detector.acquire(&request()).unwrap();

        assert_eq!(data.channels.len(), 256);
        assert_eq!(
            data.total_count,
            data.channels.iter().map(|&c| u64::from(c)).sum::<u64>()
        );
        assert!(data.realtime > data.livetime);
    }

    #[test]
    fn test_fault_injection_is_consecutive() {
        let mut detector = SimDetector::new();
        detector.configure(&config()).unwrap();
        let faults = detector.fault_handle();
        faults.fail_next(2);

        assert!(detector.acquire(&request()).is_err());
        assert!(detector.acquire(&request()).is_err());
        assert!(detector.acquire(&request()).is_ok());
    }

    #[test]
    fn test_ramp_completes_after_fixed_polls() {
        let mut detector = SimDetector::new();
        assert!(!detector.probe_stabilized().unwrap());
        detector.set_high_voltage(775).unwrap();
        assert!(detector.is_ramping().unwrap());
        assert!(detector.is_ramping().unwrap());
        assert!(!detector.is_ramping().unwrap());
        assert!(detector.probe_stabilized().unwrap());
        detector.apply_gain(1.0, 1.375).unwrap();
    }

    #[test]
    fn test_gain_before_voltage_rejected() {
        let mut detector = SimDetector::new();
        assert!(detector.apply_gain(1.0, 1.0).is_err());
    }
}
