//! Device session and BLE transport for the Airbox environmental sensor.
//!
//! The Airbox is a small BLE peripheral that reports temperature, CO2,
//! TVOC and HCHO. After a three-step init sequence it streams an 18-byte
//! notification frame per measurement. This crate holds the link to one
//! such device and keeps its latest reading.
//!
//! # Layout
//!
//! - [`session`]: open, discover, init, subscribe, calibrate, close
//! - [`store`]: the latest decoded reading, shared with readers
//! - [`traits`]: the [`Transport`] / [`PeripheralLink`] seam
//! - [`device`] and [`scan`]: the btleplug implementation of that seam
//! - [`mock`]: an in-memory implementation for tests
//!
//! # Platform Differences
//!
//! - **Linux/Windows**: devices are addressed by their Bluetooth MAC
//!   address (e.g. `AA:BB:CC:DD:EE:FF`).
//! - **macOS**: CoreBluetooth hides MAC addresses; devices are addressed by
//!   the UUID it assigns, which is stable per Mac but differs between Macs.
//!
//! # Quick Start
//!
//! ```no_run
//! use airbox_core::{BleTransport, Session, reading_store};
//! use airbox_types::protocol::decode_notification;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let address = "AA:BB:CC:DD:EE:FF".parse()?;
//!     let session = Session::open(&BleTransport::new(), &address, airbox_core::DEFAULT_CONNECT_TIMEOUT).await?;
//!
//!     session.discover_attributes().await?;
//!     session.run_init_sequence().await?;
//!
//!     let (updater, store) = reading_store();
//!     session
//!         .subscribe(move |frame| {
//!             if let Ok(reading) = decode_notification(frame) {
//!                 updater.update(reading);
//!             }
//!         })
//!         .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     println!("{}", store.snapshot());
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod error;
pub mod mock;
pub mod profile;
pub mod scan;
pub mod session;
pub mod store;
pub mod traits;
pub mod util;

// Re-export types and uuid modules from airbox-types
pub use airbox_types::protocol;
pub use airbox_types::types;
pub use airbox_types::uuid;

// Core exports
pub use device::{BleLink, BleTransport, ConnectionConfig};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use mock::{MockLink, MockTransport, MockTransportBuilder};
pub use profile::{AttributeHandle, AttributeHandles, AttributeKind, Profile};
pub use session::{DEFAULT_CONNECT_TIMEOUT, DisconnectSignal, Session, SessionState};
pub use store::{LatestReading, ReadingStore, ReadingUpdater, reading_store};
pub use traits::{DisconnectFuture, NotificationStream, PeripheralLink, Transport};
pub use util::{create_identifier, format_peripheral_id};

/// Type alias for a shared session.
///
/// A `Session` is not `Clone`; the owner that closes it and any task that
/// watches it share it through an `Arc`.
pub type SharedSession<L> = std::sync::Arc<Session<L>>;

// Re-export from airbox-types
pub use airbox_types::uuid as uuids;
pub use airbox_types::{AttributeRole, CommandFrame, DecodeError, PeripheralAddress, SensorReading};
