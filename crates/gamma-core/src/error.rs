//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised by a detector driver.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// The detector has not been configured yet
    #[error("Detector is not configured (run detector_config first)")]
    NotConfigured,

    /// A configuration value is out of range or missing
    #[error("Invalid detector config: {reason}")]
    InvalidConfig { reason: String },

    /// The hardware call itself failed
    #[error("Detector hardware fault: {reason}")]
    Hardware { reason: String },

    /// No driver registered under the requested name
    #[error("Unknown detector type: {name}")]
    UnknownDetector { name: String },
}

/// Errors raised by a spectrum persistence sink.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying I/O failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized or deserialized
    #[error("Storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// No records stored under the requested session
    #[error("No stored records for session: {session_name}")]
    UnknownSession { session_name: String },
}
