//! Protocol error types.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing or building wire messages.
///
/// Every variant is fatal for the connection that produced it: the byte
/// stream can no longer be trusted to be aligned on a message boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Header tag byte is not one of the known [`crate::MessageTag`] values
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// Header declared a negative payload length
    #[error("negative payload length {0}")]
    NegativeLength(i32),

    /// Payload exceeds the accepted maximum
    #[error("payload of {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Declared or actual payload size
        size: usize,
        /// Maximum accepted payload size
        max: usize,
    },

    /// Not enough bytes for a fixed-size structure
    #[error("{context} needs {expected} bytes, got {actual}")]
    Truncated {
        /// What was being parsed
        context: &'static str,
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Sync message carried a negative frame number
    #[error("negative frame number {0}")]
    NegativeFrameNumber(i32),

    /// Data-transfer message carried a negative package id
    #[error("negative package id {0}")]
    NegativePackageId(i32),
}
