//! State machines for session, acquisition, and detector lifecycle.
//!
//! The original controller tracked these as loose integer flags; here each
//! is an explicit tagged variant with a small transition table so every
//! transition is testable in isolation.
//!
//! - `SessionState`: whether a measurement session is running.
//! - `SpectrumState`: whether one acquisition is currently in flight.
//! - `DetectorState`: whether the detector has accepted a configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a measurement session is active.
///
/// At most one session may be `Busy` at a time (global invariant,
/// enforced by both the supervisor and the spectrometer worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session running; `start_session` is accepted.
    #[default]
    Ready,

    /// A session is running; `detector_config` and `start_session`
    /// are rejected until `stop_session`.
    Busy,
}

impl SessionState {
    /// Attempts to start a session. Returns the new state, or `None`
    /// if a session is already running.
    pub fn start(self) -> Option<Self> {
        match self {
            Self::Ready => Some(Self::Busy),
            Self::Busy => None,
        }
    }

    /// Attempts to stop the session. Returns the new state, or `None`
    /// if no session is running.
    pub fn stop(self) -> Option<Self> {
        match self {
            Self::Busy => Some(Self::Ready),
            Self::Ready => None,
        }
    }

    /// Returns true if a session is running.
    pub fn is_busy(self) -> bool {
        self == Self::Busy
    }
}

/// Whether a spectrum acquisition is currently in flight.
///
/// The session tick only launches a new acquisition when this is `Ready`,
/// so at most one blocking hardware call runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumState {
    /// No acquisition in flight; the next tick may launch one.
    #[default]
    Ready,

    /// An acquisition is running on a background task.
    Busy,
}

impl SpectrumState {
    /// Marks an acquisition as launched. Returns `None` if one is
    /// already in flight.
    pub fn launch(self) -> Option<Self> {
        match self {
            Self::Ready => Some(Self::Busy),
            Self::Busy => None,
        }
    }

    /// Marks the in-flight acquisition as finished (success or failure).
    pub fn finish(self) -> Self {
        Self::Ready
    }

    /// Returns true if an acquisition is in flight.
    pub fn is_busy(self) -> bool {
        self == Self::Busy
    }
}

/// Whether the detector has been configured.
///
/// `Warm` only after a successful `detector_config`; a failed
/// configuration leaves the previous state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    /// No configuration applied since startup.
    #[default]
    Cold,

    /// A configuration was accepted by the driver.
    Warm,
}

impl DetectorState {
    /// Marks the detector as configured.
    pub fn configured(self) -> Self {
        Self::Warm
    }

    /// Returns true if the detector has accepted a configuration.
    pub fn is_warm(self) -> bool {
        self == Self::Warm
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

impl fmt::Display for SpectrumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cold => write!(f, "cold"),
            Self::Warm => write!(f, "warm"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_transitions() {
        assert_eq!(SessionState::Ready.start(), Some(SessionState::Busy));
        assert_eq!(SessionState::Busy.start(), None);
        assert_eq!(SessionState::Busy.stop(), Some(SessionState::Ready));
        assert_eq!(SessionState::Ready.stop(), None);
    }

    #[test]
    fn test_spectrum_state_transitions() {
        assert_eq!(SpectrumState::Ready.launch(), Some(SpectrumState::Busy));
        assert_eq!(SpectrumState::Busy.launch(), None);
        assert_eq!(SpectrumState::Busy.finish(), SpectrumState::Ready);
        assert_eq!(SpectrumState::Ready.finish(), SpectrumState::Ready);
    }

    #[test]
    fn test_detector_state_transitions() {
        assert_eq!(DetectorState::Cold.configured(), DetectorState::Warm);
        assert_eq!(DetectorState::Warm.configured(), DetectorState::Warm);
        assert!(!DetectorState::Cold.is_warm());
        assert!(DetectorState::Warm.is_warm());
    }

    #[test]
    fn test_defaults_are_idle() {
        assert_eq!(SessionState::default(), SessionState::Ready);
        assert_eq!(SpectrumState::default(), SpectrumState::Ready);
        assert_eq!(DetectorState::default(), DetectorState::Cold);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::Busy).unwrap();
        assert_eq!(json, "\"busy\"");
        let state: DetectorState = serde_json::from_str("\"warm\"").unwrap();
        assert_eq!(state, DetectorState::Warm);
    }
}
