//! btleplug implementation of [`Transport`] and [`PeripheralLink`].
//!
//! [`BleTransport`] locates the peripheral on the first adapter and
//! connects; [`BleLink`] then performs discovery, writes and notification
//! subscriptions on it. Every BLE round trip is bounded by a
//! [`ConnectionConfig`] timeout.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Descriptor, Peripheral as _, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use airbox_types::PeripheralAddress;

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::profile::{AttributeHandle, Profile};
use crate::scan::{find_peripheral, get_adapter};
use crate::session::DEFAULT_CONNECT_TIMEOUT;
use crate::traits::{DisconnectFuture, NotificationStream, PeripheralLink, Transport};
use crate::util::create_identifier;

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts for the BLE transport.
///
/// The scan and connection budgets run inside the deadline given to
/// [`crate::session::Session::open`], so they must be shorter than it or
/// they never fire. [`ConnectionConfig::within`] derives both from that
/// deadline; the default does so for [`DEFAULT_CONNECT_TIMEOUT`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use airbox_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::within(Duration::from_secs(8))
///     .write_timeout(Duration::from_secs(3));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Cap on active scanning for the peripheral.
    pub scan_timeout: Duration,
    /// Budget for locating and connecting, scan included.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for writes, subscription changes and disconnect.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::within(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl ConnectionConfig {
    /// Default timeouts, sized for [`DEFAULT_CONNECT_TIMEOUT`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeouts that fit inside a connect deadline of `deadline`.
    ///
    /// Scanning gets three fifths of it and locate-plus-connect nine
    /// tenths, leaving the outer deadline as a backstop.
    pub fn within(deadline: Duration) -> Self {
        Self {
            scan_timeout: deadline * 3 / 5,
            connection_timeout: deadline * 9 / 10,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Set the scan cap.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the locate-plus-connect budget.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the timeout for writes, subscription changes and disconnect.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Opens [`BleLink`]s on the first Bluetooth adapter.
#[derive(Debug, Clone, Default)]
pub struct BleTransport {
    config: ConnectionConfig,
}

impl BleTransport {
    /// A transport with default timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport with custom timeouts.
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// The timeouts in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Link = BleLink;

    #[tracing::instrument(level = "info", skip(self), fields(address = %address))]
    async fn connect(&self, address: &PeripheralAddress) -> Result<BleLink> {
        let started = Instant::now();
        let budget = self.config.connection_timeout;

        let adapter = get_adapter().await?;
        let scan_timeout = self.config.scan_timeout.min(budget);
        let peripheral = find_peripheral(&adapter, address, scan_timeout).await?;

        // Subscribe before connecting so a drop right after connect is seen.
        let events = adapter.events().await?;

        info!("Connecting to device...");
        let remaining = budget.saturating_sub(started.elapsed());
        match timeout(remaining, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(connect_error(address, Some(e))),
            Err(_) => return Err(connect_error(address, None)),
        }

        if let Ok(Some(props)) = peripheral.properties().await {
            debug!(
                identifier = %create_identifier(&props.address.to_string(), &peripheral.id()),
                name = ?props.local_name,
                rssi = ?props.rssi,
                "Connected"
            );
        }

        Ok(BleLink {
            adapter,
            peripheral,
            address: address.clone(),
            config: self.config.clone(),
            attributes: RwLock::new(HashMap::new()),
            events: Mutex::new(Some(events)),
        })
    }
}

/// `None` means the connect budget ran out.
fn connect_error(address: &PeripheralAddress, error: Option<btleplug::Error>) -> Error {
    let reason = match error {
        Some(e) => ConnectionFailureReason::BleError(e.to_string()),
        None => ConnectionFailureReason::Timeout,
    };
    Error::connection_failed(Some(address.to_string()), reason)
}

#[derive(Debug, Clone)]
enum BleAttribute {
    Characteristic(Characteristic),
    Descriptor(Descriptor),
}

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// A connected btleplug peripheral.
pub struct BleLink {
    /// Kept so the adapter outlives the connection.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    address: PeripheralAddress,
    config: ConnectionConfig,
    /// Attributes from the last discovery, by handle id.
    attributes: RwLock<HashMap<u16, BleAttribute>>,
    /// Adapter events, handed to the first `disconnected()` caller.
    events: Mutex<Option<EventStream>>,
}

impl std::fmt::Debug for BleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleLink")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BleLink {
    async fn attribute(&self, handle: &AttributeHandle) -> Option<BleAttribute> {
        self.attributes.read().await.get(&handle.id()).cloned()
    }

    async fn characteristic(&self, handle: &AttributeHandle) -> Option<Characteristic> {
        match self.attribute(handle).await {
            Some(BleAttribute::Characteristic(c)) => Some(c),
            _ => None,
        }
    }
}

#[async_trait]
impl PeripheralLink for BleLink {
    fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    async fn discover(&self) -> Result<Profile> {
        info!("Discovering services...");
        timeout(
            self.config.discovery_timeout,
            self.peripheral.discover_services(),
        )
        .await
        .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))??;

        let mut builder = Profile::builder();
        let mut attributes = HashMap::new();
        let mut next_id: u16 = 0;

        for service in self.peripheral.services() {
            debug!("  Service: {}", service.uuid);
            for characteristic in service.characteristics {
                debug!("    Characteristic: {}", characteristic.uuid);
                builder = builder.characteristic(characteristic.uuid);
                attributes.insert(next_id, BleAttribute::Characteristic(characteristic.clone()));
                next_id = next_id.saturating_add(1);

                for descriptor in characteristic.descriptors {
                    debug!("      Descriptor: {}", descriptor.uuid);
                    builder = builder.descriptor(characteristic.uuid, descriptor.uuid);
                    attributes.insert(next_id, BleAttribute::Descriptor(descriptor));
                    next_id = next_id.saturating_add(1);
                }
            }
        }

        *self.attributes.write().await = attributes;
        Ok(builder.build())
    }

    async fn write(
        &self,
        handle: &AttributeHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let uuid = handle.uuid();
        let write_timeout = self.config.write_timeout;
        let attribute = self
            .attribute(handle)
            .await
            .ok_or_else(|| Error::write_failed(uuid, "unknown attribute handle"))?;

        let result = match attribute {
            BleAttribute::Characteristic(c) => {
                let write_type = if with_response {
                    WriteType::WithResponse
                } else {
                    WriteType::WithoutResponse
                };
                timeout(write_timeout, self.peripheral.write(&c, data, write_type)).await
            }
            BleAttribute::Descriptor(d) => {
                timeout(write_timeout, self.peripheral.write_descriptor(&d, data)).await
            }
        };

        result
            .map_err(|_| Error::timeout(format!("write attribute {}", uuid), write_timeout))?
            .map_err(|e| Error::write_failed(uuid, e.to_string()))
    }

    async fn subscribe(&self, handle: &AttributeHandle) -> Result<NotificationStream> {
        let characteristic = self.characteristic(handle).await.ok_or_else(|| {
            Error::SubscribeFailed {
                uuid: handle.uuid(),
                reason: "not a discovered characteristic".into(),
            }
        })?;

        timeout(
            self.config.write_timeout,
            self.peripheral.subscribe(&characteristic),
        )
        .await
        .map_err(|_| Error::timeout("subscribe", self.config.write_timeout))??;

        let uuid = characteristic.uuid;
        let stream = self
            .peripheral
            .notifications()
            .await?
            .filter_map(move |n| {
                futures::future::ready((n.uuid == uuid).then(|| Bytes::from(n.value)))
            });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, handle: &AttributeHandle) -> Result<()> {
        let characteristic = self
            .characteristic(handle)
            .await
            .ok_or(Error::NotConnected)?;

        timeout(
            self.config.write_timeout,
            self.peripheral.unsubscribe(&characteristic),
        )
        .await
        .map_err(|_| Error::timeout("unsubscribe", self.config.write_timeout))??;
        Ok(())
    }

    fn disconnected(&self) -> DisconnectFuture {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let id = self.peripheral.id();

        match events {
            Some(mut events) => Box::pin(async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(disconnected) = event
                        && disconnected == id
                    {
                        return;
                    }
                }
                warn!("Adapter event stream ended");
            }),
            None => Box::pin(futures::future::pending()),
        }
    }

    async fn close(&self) -> Result<()> {
        info!("Disconnecting from device...");
        timeout(self.config.write_timeout, self.peripheral.disconnect())
            .await
            .map_err(|_| Error::timeout("disconnect", self.config.write_timeout))??;
        Ok(())
    }
}
