//! Bluetooth UUIDs for Airbox devices.
//!
//! The device exposes its protocol on two vendor characteristics in the
//! 16-bit `0xFFFx` range, expanded into the Bluetooth base UUID.

use uuid::{Uuid, uuid};

// --- Airbox Characteristic UUIDs ---

/// Command characteristic (`0xFFF1`).
///
/// Receives the configuration and confirmation frames of the init sequence
/// as well as the calibration frame.
pub const COMMAND: Uuid = uuid!("0000fff1-0000-1000-8000-00805f9b34fb");

/// Notify characteristic (`0xFFF4`) carrying the telemetry stream.
pub const NOTIFY: Uuid = uuid!("0000fff4-0000-1000-8000-00805f9b34fb");

// --- Standard GATT Descriptor UUIDs ---

/// Client Characteristic Configuration Descriptor (`0x2902`).
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Expand a 16-bit assigned number into a full 128-bit UUID.
///
/// # Examples
///
/// ```
/// use airbox_types::uuid::{from_short, NOTIFY};
///
/// assert_eq!(from_short(0xfff4), NOTIFY);
/// ```
#[must_use]
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_uuid() {
        assert_eq!(COMMAND.to_string(), "0000fff1-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_notify_uuid() {
        assert_eq!(NOTIFY.to_string(), "0000fff4-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_cccd_uuid() {
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_from_short_matches_constants() {
        assert_eq!(from_short(0xfff1), COMMAND);
        assert_eq!(from_short(0xfff4), NOTIFY);
        assert_eq!(from_short(0x2902), CLIENT_CHARACTERISTIC_CONFIG);
    }

    #[test]
    fn test_uuids_are_distinct() {
        assert_ne!(COMMAND, NOTIFY);
        assert_ne!(NOTIFY, CLIENT_CHARACTERISTIC_CONFIG);
    }
}
