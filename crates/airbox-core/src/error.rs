//! Error types for airbox-core.
//!
//! Every failure a device session can hit is an [`Error`] variant. During
//! setup (connect, discovery, init sequence, subscription) errors are fatal
//! and are handed back to the caller. Once streaming, per-notification
//! problems such as a malformed frame are logged and dropped instead.
//!
//! | Phase | Variants |
//! |-------|----------|
//! | Connect | [`Error::ConnectionFailed`], [`Error::DeviceNotFound`], [`Error::Timeout`], [`Error::Bluetooth`] |
//! | Discovery | [`Error::MissingAttribute`] |
//! | Init sequence | [`Error::InitFailed`] |
//! | Subscribe | [`Error::SubscribeFailed`] |
//! | Streaming | [`Error::LinkLost`] |
//!
//! Malformed frames surface as [`airbox_types::DecodeError`] to the
//! notification handler and never become an [`Error`].

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use airbox_types::{AttributeRole, PeripheralAddress};

use crate::profile::AttributeKind;

/// Errors that can occur when talking to an Airbox peripheral.
///
/// Non-exhaustive: match with a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from the BLE stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during lookup.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The link could not be established.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Address or id of the peripheral, when known.
        device_id: Option<String>,
        /// Why it failed.
        reason: ConnectionFailureReason,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// A required attribute is absent from the discovered profile.
    #[error("Missing {kind} {uuid} (profile has {attribute_count} attributes)")]
    MissingAttribute {
        /// UUID the profile lacked.
        uuid: Uuid,
        /// Whether a characteristic or a descriptor was expected.
        kind: AttributeKind,
        /// Number of attributes in the discovered profile.
        attribute_count: usize,
    },

    /// A step of the init sequence could not be written.
    #[error("Init step {step} ({role}) failed: {source}")]
    InitFailed {
        /// One-based index of the failing step.
        step: usize,
        /// The attribute the step targets.
        role: AttributeRole,
        /// The underlying write error.
        source: Box<Error>,
    },

    /// A write was not accepted.
    #[error("Write failed to attribute {uuid}: {reason}")]
    WriteFailed {
        /// The attribute UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Subscribing to notifications failed.
    #[error("Subscribe failed for characteristic {uuid}: {reason}")]
    SubscribeFailed {
        /// The characteristic UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Attributes were used before [`discover_attributes`] resolved them.
    ///
    /// [`discover_attributes`]: crate::session::Session::discover_attributes
    #[error("Attributes have not been discovered yet")]
    AttributesNotResolved,

    /// The session is closing or closed.
    #[error("Not connected to device")]
    NotConnected,

    /// The peripheral dropped the link without being asked to.
    #[error("Link to {address} lost")]
    LinkLost {
        /// Address of the peripheral.
        address: PeripheralAddress,
    },
}

/// Why a connect attempt failed.
///
/// Non-exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// No usable adapter (missing or powered off).
    AdapterUnavailable,
    /// The peripheral refused the connection.
    Rejected,
    /// The connect deadline passed.
    Timeout,
    /// The BLE stack reported an error while connecting.
    BleError(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable or powered off"),
            Self::Rejected => write!(f, "peripheral refused the connection"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
        }
    }
}

/// Why a peripheral could not be located.
///
/// Non-exhaustive.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with the specified address not found.
    NotFound { identifier: String },
    /// Scanning ended without a match.
    ScanTimeout { duration: Duration },
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// No peripheral matched `identifier`.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a missing attribute error.
    pub fn missing_attribute(uuid: Uuid, kind: AttributeKind, attribute_count: usize) -> Self {
        Self::MissingAttribute {
            uuid,
            kind,
            attribute_count,
        }
    }

    /// Create a write failure for an attribute.
    pub fn write_failed(uuid: Uuid, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            uuid,
            reason: reason.into(),
        }
    }

    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }
}

/// Result type alias using airbox-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
