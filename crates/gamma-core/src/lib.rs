//! Gamma Core - Shared domain types for the gamma measurement daemon
//!
//! This crate provides the domain model shared between the daemon (gammad)
//! and the terminal client (gammac): detector configuration, spectrum
//! records, position fixes, and the state machines governing session,
//! acquisition, and detector lifecycle.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod detector;
pub mod error;
pub mod position;
pub mod session;
pub mod spectrum;
pub mod state;

// Re-exports for convenience
pub use detector::{AcquisitionRequest, DetectorConfig, GainSettings, SpectralData};
pub use error::{DriverError, StorageError};
pub use position::{PositionFix, PositionSample};
pub use session::{FailureCounter, Session, MAX_CONSECUTIVE_FAILURES};
pub use spectrum::SpectrumRecord;
pub use state::{DetectorState, SessionState, SpectrumState};
