//! Platform-agnostic types for the Airbox environmental sensor.
//!
//! This crate holds everything about the device that does not need a
//! Bluetooth stack:
//!
//! - [`SensorReading`], the decoded telemetry value
//! - [`PeripheralAddress`], the identifier of the target device
//! - the [`protocol`] codec: notification decoding and command frames
//! - UUID constants for the device's attributes
//!
//! # Example
//!
//! ```
//! use airbox_types::protocol::{decode_notification, NOTIFICATION_FRAME_LEN};
//!
//! let frame = [0u8; NOTIFICATION_FRAME_LEN];
//! let reading = decode_notification(&frame).unwrap();
//! assert_eq!(reading.co2, -150);
//! ```

pub mod error;
pub mod protocol;
pub mod types;
pub mod uuid;

pub use error::{AddressError, DecodeError};
pub use protocol::{AttributeRole, CommandFrame};
pub use types::{PeripheralAddress, SensorReading};
pub use uuid as uuids;
