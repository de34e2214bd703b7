//! Completed spectrum acquisition records.

use crate::detector::SpectralData;
use crate::position::PositionFix;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed spectrum acquisition with its full context.
///
/// Built by the spectrometer worker from the driver's [`SpectralData`]
/// plus position snapshots taken before and after the hardware call.
/// Indices are assigned strictly increasing from 0 within one session,
/// with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRecord {
    /// Name of the owning session
    pub session_name: String,

    /// Acquisition index within the session, starting at 0
    pub index: u64,

    /// Wall-clock time when the acquisition started
    pub time_start: DateTime<Utc>,

    /// Wall-clock time when the acquisition completed
    pub time_end: DateTime<Utc>,

    /// Position snapshot taken just before the hardware call
    pub position_start: PositionFix,

    /// Position snapshot taken just after the hardware call
    pub position_end: PositionFix,

    /// Per-channel counts
    pub channels: Vec<u32>,

    /// Number of channels (redundant with `channels.len()`, kept on the
    /// wire so clients can validate truncated payloads)
    pub num_channels: u32,

    /// Sum of all channel counts
    pub total_count: u64,

    /// Actual active counting time in seconds
    pub livetime: f64,

    /// Actual wall-clock counting time in seconds
    pub realtime: f64,

    /// Hardware status description
    pub status: String,
}

impl SpectrumRecord {
    /// Assembles a record from one acquisition attempt.
    pub fn assemble(
        session_name: String,
        index: u64,
        data: SpectralData,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
        position_start: PositionFix,
        position_end: PositionFix,
    ) -> Self {
        let num_channels = data.channels.len() as u32;
        Self {
            session_name,
            index,
            time_start,
            time_end,
            position_start,
            position_end,
            channels: data.channels,
            num_channels,
            total_count: data.total_count,
            livetime: data.livetime,
            realtime: data.realtime,
            status: data.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_derives_channel_count() {
        let data = SpectralData::from_channels(vec![5, 0, 7], 2.0, 2.2);
        let now = Utc::now();
        let record = SpectrumRecord::assemble(
            "S1".to_string(),
            0,
            data,
            now,
            now,
            PositionFix::default(),
            PositionFix::default(),
        );
        assert_eq!(record.num_channels, 3);
        assert_eq!(record.total_count, 12);
        assert_eq!(record.index, 0);
    }

    #[test]
    fn test_record_json_roundtrip() {
        let data = SpectralData::from_channels(vec![1, 2], 1.0, 1.1);
        let now = Utc::now();
        let record = SpectrumRecord::assemble(
            "survey".to_string(),
            4,
            data,
            now,
            now,
            PositionFix::default(),
            PositionFix::default(),
        );
        let json = serde_json::to_string(&record).unwrap();
        let parsed: SpectrumRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
