//! Core types for Airbox sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A decoded reading from an Airbox sensor.
///
/// Every successfully decoded notification frame produces a fresh value.
/// `SensorReading::default()` is the all-zero reading reported before the
/// first notification arrives.
///
/// Serializes as a flat record:
///
/// ```
/// use airbox_types::SensorReading;
///
/// let reading = SensorReading { temperature: 21.5, co2: 612, tvoc: 0.02, hcho: 0.01 };
/// let json = serde_json::to_string(&reading).unwrap();
/// assert!(json.contains("\"co2\":612"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Temperature in degrees Celsius, one decimal place.
    pub temperature: f32,
    /// CO2 concentration in ppm, calibration offset already applied.
    pub co2: i32,
    /// Volatile organic compound index, three decimal places.
    pub tvoc: f32,
    /// Formaldehyde index, three decimal places.
    pub hcho: f32,
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temperature={:.1}°C co2={}ppm tvoc={:.3} hcho={:.3}",
            self.temperature, self.co2, self.tvoc, self.hcho
        )
    }
}

/// Address of the target peripheral.
///
/// This is the Bluetooth MAC address on Linux and Windows
/// (e.g. `AA:BB:CC:DD:EE:FF`) and the CoreBluetooth UUID on macOS.
/// The value is kept as supplied; comparisons against discovered
/// peripherals go through [`PeripheralAddress::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Parse an address, rejecting empty input.
    ///
    /// # Examples
    ///
    /// ```
    /// use airbox_types::PeripheralAddress;
    ///
    /// assert!(PeripheralAddress::new("AA:BB:CC:DD:EE:FF").is_ok());
    /// assert!(PeripheralAddress::new("  ").is_err());
    /// ```
    pub fn new(address: impl Into<String>) -> Result<Self, AddressError> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self(address))
    }

    /// The address as supplied.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a discovered identifier refers to this peripheral.
    ///
    /// Matching is case-insensitive and ignores `:` and `-` separators, so
    /// `aabbccddeeff` matches `AA:BB:CC:DD:EE:FF`.
    ///
    /// ```
    /// use airbox_types::PeripheralAddress;
    ///
    /// let addr = PeripheralAddress::new("AA:BB:CC:DD:EE:FF").unwrap();
    /// assert!(addr.matches("aa:bb:cc:dd:ee:ff"));
    /// assert!(addr.matches("AABBCCDDEEFF"));
    /// assert!(!addr.matches("AA:BB:CC:DD:EE:00"));
    /// ```
    pub fn matches(&self, identifier: &str) -> bool {
        normalize(&self.0) == normalize(identifier)
    }
}

fn normalize(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeripheralAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PeripheralAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Format raw MAC bytes as `AA:BB:CC:DD:EE:FF`.
impl From<[u8; 6]> for PeripheralAddress {
    fn from(mac: [u8; 6]) -> Self {
        Self(
            mac.iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":"),
        )
    }
}

impl From<PeripheralAddress> for String {
    fn from(value: PeripheralAddress) -> Self {
        value.0
    }
}
