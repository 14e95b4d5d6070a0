//! Transport abstractions.
//!
//! A [`Transport`] opens a [`PeripheralLink`] to an address. The session
//! only talks to these traits, so the same code drives a real btleplug
//! peripheral ([`crate::device::BleTransport`]) and the in-memory
//! [`crate::mock::MockTransport`] used in tests.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::future::BoxFuture;

use airbox_types::PeripheralAddress;

use crate::error::Result;
use crate::profile::{AttributeHandle, Profile};

/// Raw notification payloads, in arrival order.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Resolves once when the link goes away.
pub type DisconnectFuture = BoxFuture<'static, ()>;

/// Something that can open a link to a peripheral.
#[async_trait]
pub trait Transport: Send + Sync {
    type Link: PeripheralLink + 'static;

    /// Connect to the peripheral at `address`.
    async fn connect(&self, address: &PeripheralAddress) -> Result<Self::Link>;
}

/// An open link to a single peripheral.
///
/// # Example
///
/// ```ignore
/// use airbox_core::{PeripheralLink, Result};
///
/// async fn count_attributes<L: PeripheralLink>(link: &L) -> Result<usize> {
///     Ok(link.discover().await?.len())
/// }
/// ```
#[async_trait]
pub trait PeripheralLink: Send + Sync {
    /// Address of the connected peripheral.
    fn address(&self) -> &PeripheralAddress;

    /// Enumerate the peripheral's attributes.
    async fn discover(&self) -> Result<Profile>;

    /// Write `data` to an attribute.
    ///
    /// With `with_response` set the call returns only after the peripheral
    /// acknowledged the write. Descriptor writes are always acknowledged.
    async fn write(&self, handle: &AttributeHandle, data: &[u8], with_response: bool)
    -> Result<()>;

    /// Enable notifications on a characteristic and return its payloads.
    async fn subscribe(&self, handle: &AttributeHandle) -> Result<NotificationStream>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, handle: &AttributeHandle) -> Result<()>;

    /// A future that resolves when the link is lost, for whatever reason.
    ///
    /// Only the first call is guaranteed to observe the loss; later calls
    /// may return a future that never resolves.
    fn disconnected(&self) -> DisconnectFuture;

    /// Release the link.
    async fn close(&self) -> Result<()>;
}
