//! Wire protocol of the Airbox sensor.
//!
//! The codec is pure: it turns notification payloads into
//! [`SensorReading`]s and supplies the fixed command frames the device
//! expects. Performing the writes is left to the caller.
//!
//! # Notification frame
//!
//! Every notification is exactly [`NOTIFICATION_FRAME_LEN`] bytes. Fields
//! are big-endian `u16` values at fixed offsets:
//!
//! | Offset | Field | Scale |
//! |--------|-------|-------|
//! | 6-7 | temperature | / 10 |
//! | 10-11 | TVOC | / 1000 |
//! | 12-13 | HCHO | / 1000 |
//! | 16-17 | CO2 | - [`CO2_CALIBRATION_OFFSET`] |
//!
//! All other bytes are ignored.
//!
//! # Init sequence
//!
//! The device only starts streaming after three writes, in this order:
//!
//! 1. `01 00` to the notify configuration descriptor
//! 2. `aa 15 03 1a 00 09 35` to the command characteristic
//! 3. `ab` to the command characteristic

use bytes::{Buf, Bytes};

use crate::error::DecodeError;
use crate::types::SensorReading;

/// Length of a telemetry notification frame.
pub const NOTIFICATION_FRAME_LEN: usize = 18;

/// Offset subtracted from the raw CO2 value.
pub const CO2_CALIBRATION_OFFSET: i32 = 150;

const TEMPERATURE_OFFSET: usize = 6;
const TVOC_OFFSET: usize = 10;
const HCHO_OFFSET: usize = 12;
const CO2_OFFSET: usize = 16;

/// Enable-notifications value for the CCCD.
pub const ENABLE_NOTIFICATIONS: &[u8] = &[0x01, 0x00];

/// Configuration frame, second step of the init sequence.
pub const INIT_CONFIG: &[u8] = &[0xaa, 0x15, 0x03, 0x1a, 0x00, 0x09, 0x35];

/// Confirmation frame, last step of the init sequence.
pub const INIT_CONFIRM: &[u8] = &[0xab];

/// Calibration frame.
pub const CALIBRATE: &[u8] = &[0xad];

/// The attribute a command frame is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeRole {
    /// Command characteristic (`0xFFF1`).
    Command,
    /// Telemetry characteristic (`0xFFF4`).
    Notify,
    /// Client characteristic configuration descriptor of the telemetry
    /// characteristic (`0x2902`).
    NotifyConfig,
}

impl core::fmt::Display for AttributeRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AttributeRole::Command => write!(f, "command"),
            AttributeRole::Notify => write!(f, "notify"),
            AttributeRole::NotifyConfig => write!(f, "notify config"),
        }
    }
}

/// One outbound write.
///
/// Frames are built from static data, so cloning is free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame(Bytes);

impl CommandFrame {
    fn from_static(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }

    /// The raw bytes to write.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in the frame.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame is empty. Frames produced by this module never are.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Decode a telemetry notification.
///
/// # Errors
///
/// Returns [`DecodeError::UnexpectedLength`] unless `payload` is exactly
/// [`NOTIFICATION_FRAME_LEN`] bytes long.
///
/// # Examples
///
/// ```
/// use airbox_types::protocol::decode_notification;
///
/// let mut frame = [0u8; 18];
/// frame[6..8].copy_from_slice(&[0x00, 0xd7]); // 215 -> 21.5 °C
/// frame[16..18].copy_from_slice(&[0x02, 0xee]); // 750 -> 600 ppm
///
/// let reading = decode_notification(&frame).unwrap();
/// assert!((reading.temperature - 21.5).abs() < 0.001);
/// assert_eq!(reading.co2, 600);
/// ```
#[must_use = "decoding returns a Result that should be handled"]
pub fn decode_notification(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    if payload.len() != NOTIFICATION_FRAME_LEN {
        return Err(DecodeError::UnexpectedLength {
            expected: NOTIFICATION_FRAME_LEN,
            actual: payload.len(),
        });
    }

    let temperature = be_u16(payload, TEMPERATURE_OFFSET);
    let tvoc = be_u16(payload, TVOC_OFFSET);
    let hcho = be_u16(payload, HCHO_OFFSET);
    let co2 = be_u16(payload, CO2_OFFSET);

    Ok(SensorReading {
        temperature: f32::from(temperature) / 10.0,
        co2: i32::from(co2) - CO2_CALIBRATION_OFFSET,
        tvoc: f32::from(tvoc) / 1000.0,
        hcho: f32::from(hcho) / 1000.0,
    })
}

// Callers check the frame length first.
fn be_u16(payload: &[u8], offset: usize) -> u16 {
    let mut buf = &payload[offset..offset + 2];
    buf.get_u16()
}

/// The init sequence, in the order it must be written.
pub fn init_commands() -> [(AttributeRole, CommandFrame); 3] {
    [
        (
            AttributeRole::NotifyConfig,
            CommandFrame::from_static(ENABLE_NOTIFICATIONS),
        ),
        (AttributeRole::Command, CommandFrame::from_static(INIT_CONFIG)),
        (AttributeRole::Command, CommandFrame::from_static(INIT_CONFIRM)),
    ]
}

/// The calibration frame, written to [`AttributeRole::Command`].
pub fn calibration_command() -> CommandFrame {
    CommandFrame::from_static(CALIBRATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(fields: &[(usize, [u8; 2])]) -> [u8; NOTIFICATION_FRAME_LEN] {
        let mut frame = [0u8; NOTIFICATION_FRAME_LEN];
        for (offset, value) in fields {
            frame[*offset..*offset + 2].copy_from_slice(value);
        }
        frame
    }

    #[test]
    fn test_decode_reference_frame() {
        let frame = frame_with(&[
            (6, [0x00, 0x64]),
            (10, [0x00, 0x14]),
            (12, [0x00, 0x0A]),
            (16, [0x00, 0xC8]),
        ]);

        let reading = decode_notification(&frame).unwrap();

        assert!((reading.temperature - 10.0).abs() < 0.001);
        assert!((reading.tvoc - 0.020).abs() < 0.0001);
        assert!((reading.hcho - 0.010).abs() < 0.0001);
        assert_eq!(reading.co2, 50);
    }

    #[test]
    fn test_decode_is_big_endian() {
        // 0x0102 = 258, little-endian would give 513
        let frame = frame_with(&[(6, [0x01, 0x02])]);
        let reading = decode_notification(&frame).unwrap();
        assert!((reading.temperature - 25.8).abs() < 0.001);
    }

    #[test]
    fn test_decode_all_zero_frame_gives_negative_co2() {
        let frame = [0u8; NOTIFICATION_FRAME_LEN];
        let reading = decode_notification(&frame).unwrap();
        assert_eq!(reading.co2, -CO2_CALIBRATION_OFFSET);
        assert_eq!(reading.temperature, 0.0);
        assert_eq!(reading.tvoc, 0.0);
        assert_eq!(reading.hcho, 0.0);
    }

    #[test]
    fn test_decode_max_values() {
        let frame = frame_with(&[
            (6, [0xFF, 0xFF]),
            (10, [0xFF, 0xFF]),
            (12, [0xFF, 0xFF]),
            (16, [0xFF, 0xFF]),
        ]);
        let reading = decode_notification(&frame).unwrap();
        assert!((reading.temperature - 6553.5).abs() < 0.01);
        assert!((reading.tvoc - 65.535).abs() < 0.001);
        assert!((reading.hcho - 65.535).abs() < 0.001);
        assert_eq!(reading.co2, 65535 - 150);
    }

    #[test]
    fn test_decode_ignores_unused_bytes() {
        let mut frame = frame_with(&[(16, [0x01, 0xF4])]);
        for i in [0, 1, 2, 3, 4, 5, 8, 9, 14, 15] {
            frame[i] = 0xEE;
        }
        let reading = decode_notification(&frame).unwrap();
        assert_eq!(reading.co2, 350);
        assert_eq!(reading.temperature, 0.0);
    }

    #[test]
    fn test_decode_short_frame() {
        let err = decode_notification(&[0u8; 17]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedLength {
                expected: 18,
                actual: 17
            }
        );
        assert!(err.to_string().contains("expected 18 bytes, got 17"));
    }

    #[test]
    fn test_decode_long_frame() {
        let result = decode_notification(&[0u8; 20]);
        assert!(matches!(
            result,
            Err(DecodeError::UnexpectedLength { actual: 20, .. })
        ));
    }

    #[test]
    fn test_decode_empty_frame() {
        assert!(decode_notification(&[]).is_err());
    }

    #[test]
    fn test_init_commands_order() {
        let commands = init_commands();

        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].0, AttributeRole::NotifyConfig);
        assert_eq!(commands[0].1.as_bytes(), &[0x01, 0x00]);
        assert_eq!(commands[1].0, AttributeRole::Command);
        assert_eq!(
            commands[1].1.as_bytes(),
            &[0xaa, 0x15, 0x03, 0x1a, 0x00, 0x09, 0x35]
        );
        assert_eq!(commands[2].0, AttributeRole::Command);
        assert_eq!(commands[2].1.as_bytes(), &[0xab]);
    }

    #[test]
    fn test_init_commands_are_stable() {
        assert_eq!(init_commands(), init_commands());
    }

    #[test]
    fn test_calibration_command() {
        let frame = calibration_command();
        assert_eq!(frame.as_bytes(), &[0xad]);
        assert_eq!(frame.len(), 1);
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_attribute_role_display() {
        assert_eq!(AttributeRole::Command.to_string(), "command");
        assert_eq!(AttributeRole::NotifyConfig.to_string(), "notify config");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any payload that is not exactly one frame long is rejected.
        #[test]
        fn wrong_length_is_rejected(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assume!(data.len() != NOTIFICATION_FRAME_LEN);
            let result = decode_notification(&data);
            prop_assert_eq!(
                result,
                Err(DecodeError::UnexpectedLength {
                    expected: NOTIFICATION_FRAME_LEN,
                    actual: data.len(),
                })
            );
        }

        /// Full-length frames always decode, and decoding is deterministic.
        #[test]
        fn full_frames_decode_deterministically(data in proptest::collection::vec(any::<u8>(), NOTIFICATION_FRAME_LEN)) {
            let first = decode_notification(&data).unwrap();
            let second = decode_notification(&data).unwrap();
            prop_assert_eq!(first, second);
            prop_assert!(first.co2 >= -CO2_CALIBRATION_OFFSET);
            prop_assert!(first.temperature >= 0.0);
        }
    }
}
