//! BLE-to-HTTP gateway for the Airbox environmental sensor.
//!
//! This crate provides a service that:
//! - Connects to one Airbox and runs its init sequence
//! - Decodes every notification into the latest reading
//! - Serves that reading over HTTP
//! - Optionally sends the CO2 calibration command and exits
//!
//! # HTTP Endpoints
//!
//! - `GET /` - Latest reading as one JSON line
//! - `GET /api/health` - Liveness and reading freshness
//!
//! # Configuration
//!
//! The service reads `~/.config/airbox/gateway.toml` when it exists:
//!
//! ```toml
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! connect_timeout_secs = 5
//!
//! [server]
//! bind = ":6161"
//! ```
//!
//! Command-line flags override the file.

pub mod api;
pub mod config;
pub mod lifecycle;
pub mod state;

pub use config::{Config, ConfigError, DeviceConfig, Overrides, ServerConfig, ValidationError};
pub use lifecycle::{Controller, Outcome, bind_listener, serve, shutdown_signal};
pub use state::AppState;
