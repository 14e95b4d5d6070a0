//! Locating the target peripheral.
//!
//! The gateway always knows the address it wants, so lookup is a targeted
//! search: the adapter's list of known peripherals is checked first, and
//! only if the device is not there does an active scan run until it shows
//! up or the scan deadline passes. The scan is stopped even when the
//! caller gives up on the search first.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use airbox_types::PeripheralAddress;

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::util::{UNSET_ADDRESS, format_peripheral_id};

/// How often the adapter's peripheral list is polled while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Get the first available Bluetooth adapter.
///
/// A BLE stack that cannot be reached at all (no D-Bus, BlueZ down) is
/// reported as [`ConnectionFailureReason::AdapterUnavailable`].
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(adapter_unavailable)?;
    let adapters = manager.adapters().await.map_err(adapter_unavailable)?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Find the peripheral at `address`, scanning for at most `scan_timeout`.
#[tracing::instrument(level = "info", skip(adapter), fields(address = %address))]
pub async fn find_peripheral(
    adapter: &Adapter,
    address: &PeripheralAddress,
    scan_timeout: Duration,
) -> Result<Peripheral> {
    if let Some(peripheral) = find_known_peripheral(adapter, address).await? {
        info!("Found device in cache (no scan needed)");
        return Ok(peripheral);
    }

    info!("Scanning for up to {:?}...", scan_timeout);
    adapter.start_scan(ScanFilter::default()).await?;
    let mut scan = ScanGuard::new(adapter);

    let found = timeout(scan_timeout, async {
        loop {
            sleep(SCAN_POLL_INTERVAL).await;
            if let Some(peripheral) = find_known_peripheral(adapter, address).await? {
                return Ok::<_, Error>(peripheral);
            }
        }
    })
    .await;

    scan.stop().await;

    match found {
        Ok(result) => {
            if result.is_ok() {
                info!("Found device");
            }
            result
        }
        Err(_) => {
            warn!("Device not found before scan deadline");
            Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: scan_timeout,
            }))
        }
    }
}

fn adapter_unavailable(e: btleplug::Error) -> Error {
    warn!(error = %e, "Bluetooth stack unavailable");
    Error::connection_failed(None, ConnectionFailureReason::AdapterUnavailable)
}

/// Stops an active scan, on [`ScanGuard::stop`] or when dropped.
///
/// `find_peripheral` runs under the session's connect deadline; if that
/// deadline cancels the search mid-scan the drop path still stops it.
struct ScanGuard {
    adapter: Option<Adapter>,
}

impl ScanGuard {
    fn new(adapter: &Adapter) -> Self {
        Self {
            adapter: Some(adapter.clone()),
        }
    }

    async fn stop(&mut self) {
        if let Some(adapter) = self.adapter.take()
            && let Err(e) = adapter.stop_scan().await
        {
            debug!(error = %e, "Failed to stop scan");
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let Some(adapter) = self.adapter.take() else {
            return;
        };
        debug!("Scan abandoned, stopping it");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    debug!(error = %e, "Failed to stop scan");
                }
            });
        } else {
            warn!("No tokio runtime available to stop the scan");
        }
    }
}

/// Search through known peripherals for one matching `address`.
async fn find_known_peripheral(
    adapter: &Adapter,
    address: &PeripheralAddress,
) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        // macOS identifies peripherals by UUID
        let id = format_peripheral_id(&peripheral.id());
        if address.matches(&id) {
            debug!("Matched by peripheral ID: {}", id);
            return Ok(Some(peripheral));
        }

        if let Ok(Some(props)) = peripheral.properties().await {
            let mac = props.address.to_string();
            if mac != UNSET_ADDRESS && address.matches(&mac) {
                debug!("Matched by address: {}", mac);
                return Ok(Some(peripheral));
            }
        }
    }

    Ok(None)
}
