//! Detector configuration and acquisition value types.

use serde::{Deserialize, Serialize};

/// Configuration applied to the detector by `detector_config`.
///
/// Field names and units follow the wire protocol: bias voltage in volts,
/// gains as multipliers, discriminator levels as channel percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Bias voltage in volts (e.g. 775 for a NaI probe)
    pub voltage: u32,

    /// Coarse amplifier gain (hardware accepts 1.0, 2.0, 4.0, 8.0)
    pub coarse_gain: f64,

    /// Fine amplifier gain (hardware accepts 1.0 to 5.0)
    pub fine_gain: f64,

    /// Number of histogram channels per spectrum
    pub num_channels: u32,

    /// Lower level discriminator
    pub lld: u32,

    /// Upper level discriminator
    pub uld: u32,

    /// Driver registry key (defaults to the configured driver when omitted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_type: Option<String>,
}

impl DetectorConfig {
    /// Validates value ranges before the config reaches the hardware.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_channels == 0 {
            return Err("num_channels must be greater than zero".to_string());
        }
        if self.coarse_gain <= 0.0 || self.fine_gain <= 0.0 {
            return Err("gain values must be positive".to_string());
        }
        if self.lld >= self.uld {
            return Err(format!(
                "lld ({}) must be below uld ({})",
                self.lld, self.uld
            ));
        }
        Ok(())
    }
}

/// Gain settings applied by `set_gain`, independent of any session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainSettings {
    /// Bias voltage in volts
    pub voltage: u32,

    /// Coarse amplifier gain
    pub coarse_gain: f64,

    /// Fine amplifier gain
    pub fine_gain: f64,
}

/// Parameters for one spectrum acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    /// Name of the owning session
    pub session_name: String,

    /// Requested active counting time in seconds
    pub livetime: f64,
}

/// Raw result of one acquisition as returned by a detector driver.
///
/// Timing and position metadata are attached by the spectrometer worker;
/// the driver only reports what the hardware measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralData {
    /// Per-channel counts (length equals the configured `num_channels`)
    pub channels: Vec<u32>,

    /// Sum of all channel counts
    pub total_count: u64,

    /// Actual active counting time in seconds
    pub livetime: f64,

    /// Actual wall-clock time in seconds (livetime plus dead time)
    pub realtime: f64,

    /// Hardware status description (e.g. "ok")
    pub status: String,
}

impl SpectralData {
    /// Builds spectral data from raw channel counts, deriving the total.
    pub fn from_channels(channels: Vec<u32>, livetime: f64, realtime: f64) -> Self {
        let total_count = channels.iter().map(|&c| u64::from(c)).sum();
        Self {
            channels,
            total_count,
            livetime,
            realtime,
            status: "ok".to_string(),
        }
    }
}
