//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages.
///
/// A malformed payload is a framing-level failure; an unrecognized
/// command tag is not - that is handled at dispatch with an
/// `unknown_command` response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload is not a JSON object with a `command` string field.
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    /// A frame announced a length beyond the protocol maximum.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Underlying transport failure.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Creates a malformed-message error from any displayable cause.
    pub fn malformed<E: std::fmt::Display>(err: E) -> Self {
        Self::Malformed {
            reason: err.to_string(),
        }
    }
}
