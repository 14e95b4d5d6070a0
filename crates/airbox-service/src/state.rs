//! Application state shared across handlers.
//!
//! Handlers only read. The single [`airbox_core::ReadingUpdater`] lives in
//! the notification task, so the HTTP side can never write a reading.

use std::sync::Arc;

use airbox_core::ReadingStore;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Latest reading from the sensor.
    pub readings: ReadingStore,
}

impl AppState {
    /// Create new application state.
    pub fn new(readings: ReadingStore) -> Arc<Self> {
        Arc::new(Self { readings })
    }
}
