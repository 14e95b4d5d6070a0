//! Error types for data parsing in airbox-types.

use thiserror::Error;

/// Errors that can occur when decoding a notification frame.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in airbox-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame did not have the fixed protocol length.
    #[error("Unexpected frame length: expected {expected} bytes, got {actual}")]
    UnexpectedLength {
        /// Required frame length.
        expected: usize,
        /// Length of the payload that was received.
        actual: usize,
    },
}

/// Errors that can occur when parsing a peripheral address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AddressError {
    /// The address was empty or only whitespace.
    #[error("peripheral address cannot be empty")]
    Empty,
}
