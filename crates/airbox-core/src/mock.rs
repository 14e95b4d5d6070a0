//! Mock transport for testing.
//!
//! [`MockTransport`] hands out a [`MockLink`] that lives entirely in memory,
//! so sessions and controllers can be exercised without BLE hardware.
//!
//! # Features
//!
//! - **Failure injection**: fail the connect, the n-th write, subscribe,
//!   unsubscribe or close
//! - **Latency simulation**: delay the connect to exercise timeouts
//! - **Notifications**: push raw frames with [`MockLink::notify`]
//! - **Link loss**: simulate an unsolicited disconnect with
//!   [`MockLink::drop_link`]
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use airbox_core::mock::MockTransport;
//! use airbox_core::session::Session;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = MockTransport::new();
//!     let address = transport.address().clone();
//!
//!     let session = Session::open(&transport, &address, Duration::from_secs(5))
//!         .await
//!         .unwrap();
//!     session.discover_attributes().await.unwrap();
//!     session.run_init_sequence().await.unwrap();
//!     session.close().await;
//!
//!     assert_eq!(transport.link().writes().len(), 3);
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use airbox_types::PeripheralAddress;
use airbox_types::protocol::NOTIFICATION_FRAME_LEN;

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::profile::{AttributeHandle, Profile};
use crate::traits::{DisconnectFuture, NotificationStream, PeripheralLink, Transport};

/// A write the mock link accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub handle: AttributeHandle,
    pub data: Vec<u8>,
    pub with_response: bool,
}

/// Build a notification frame from raw field values.
///
/// The values are the unscaled big-endian words the device sends:
/// temperature in tenths of a degree, TVOC and HCHO in thousandths, and
/// CO2 before the calibration offset is subtracted.
pub fn notification_frame(temperature: u16, tvoc: u16, hcho: u16, co2: u16) -> Bytes {
    let mut frame = BytesMut::with_capacity(NOTIFICATION_FRAME_LEN);
    frame.put_bytes(0, 6);
    frame.put_u16(temperature);
    frame.put_bytes(0, 2);
    frame.put_u16(tvoc);
    frame.put_u16(hcho);
    frame.put_bytes(0, 2);
    frame.put_u16(co2);
    frame.freeze()
}

fn injected(operation: &str) -> Error {
    Error::Bluetooth(btleplug::Error::Other(
        format!("mock {} failure", operation).into(),
    ))
}

/// An in-memory transport with a single peripheral.
pub struct MockTransport {
    link: MockLink,
    connect_latency: Duration,
    connect_failure: Option<ConnectionFailureReason>,
    connects: AtomicU32,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("address", self.address())
            .field("connect_latency", &self.connect_latency)
            .field("connect_failure", &self.connect_failure)
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport with a well-behaved Airbox peripheral at a random address.
    pub fn new() -> Self {
        MockTransportBuilder::new().build()
    }

    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::new()
    }

    /// Address of the simulated peripheral.
    pub fn address(&self) -> &PeripheralAddress {
        &self.link.inner.address
    }

    /// Handle to the link, shared with every connection.
    pub fn link(&self) -> MockLink {
        self.link.clone()
    }

    /// Number of connect attempts.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn connect(&self, address: &PeripheralAddress) -> Result<MockLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if !self.connect_latency.is_zero() {
            tokio::time::sleep(self.connect_latency).await;
        }

        if let Some(reason) = &self.connect_failure {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                reason.clone(),
            ));
        }

        if !self.link.inner.address.matches(address.as_str()) {
            return Err(Error::device_not_found(address.as_str()));
        }

        Ok(self.link.clone())
    }
}

struct MockLinkInner {
    address: PeripheralAddress,
    profile: Profile,
    fail_write_at: Option<usize>,
    fail_subscribe: bool,
    fail_unsubscribe: bool,
    fail_close: bool,
    writes: Mutex<Vec<RecordedWrite>>,
    write_attempts: AtomicUsize,
    subscriber: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    subscribes: AtomicU32,
    unsubscribes: AtomicU32,
    closes: AtomicU32,
    closed: AtomicBool,
    lost: CancellationToken,
}

/// The in-memory peripheral link. Clones share state.
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<MockLinkInner>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("address", &self.inner.address)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("lost", &self.inner.lost.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl MockLink {
    /// Push a notification to the current subscriber.
    ///
    /// Returns `false` if nobody is subscribed.
    pub fn notify(&self, payload: impl Into<Bytes>) -> bool {
        let subscriber = self
            .inner
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match subscriber.as_ref() {
            Some(tx) => tx.send(payload.into()).is_ok(),
            None => false,
        }
    }

    /// Simulate the peripheral going away.
    pub fn drop_link(&self) {
        self.end_stream();
        self.inner.lost.cancel();
    }

    /// Writes accepted so far, in order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.inner
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe_count(&self) -> u32 {
        self.inner.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> u32 {
        self.inner.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn is_gone(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.lost.is_cancelled()
    }

    fn end_stream(&self) {
        self.inner
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn check_handle(&self, handle: &AttributeHandle) -> Result<()> {
        if self.inner.profile.iter().any(|a| a == handle) {
            Ok(())
        } else {
            Err(Error::write_failed(handle.uuid(), "unknown attribute handle"))
        }
    }
}

#[async_trait]
impl PeripheralLink for MockLink {
    fn address(&self) -> &PeripheralAddress {
        &self.inner.address
    }

    async fn discover(&self) -> Result<Profile> {
        if self.is_gone() {
            return Err(Error::NotConnected);
        }
        Ok(self.inner.profile.clone())
    }

    async fn write(
        &self,
        handle: &AttributeHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        if self.is_gone() {
            return Err(Error::NotConnected);
        }
        self.check_handle(handle)?;

        let attempt = self.inner.write_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.fail_write_at == Some(attempt) {
            return Err(Error::write_failed(handle.uuid(), "mock write failure"));
        }

        self.inner
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedWrite {
                handle: *handle,
                data: data.to_vec(),
                with_response,
            });
        Ok(())
    }

    async fn subscribe(&self, handle: &AttributeHandle) -> Result<NotificationStream> {
        if self.is_gone() {
            return Err(Error::NotConnected);
        }
        self.check_handle(handle)?;
        self.inner.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_subscribe {
            return Err(injected("subscribe"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .inner
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, _handle: &AttributeHandle) -> Result<()> {
        self.inner.unsubscribes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_unsubscribe {
            return Err(injected("unsubscribe"));
        }
        self.end_stream();
        Ok(())
    }

    fn disconnected(&self) -> DisconnectFuture {
        let lost = self.inner.lost.clone();
        Box::pin(async move { lost.cancelled().await })
    }

    async fn close(&self) -> Result<()> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_close {
            return Err(injected("close"));
        }
        self.inner.closed.store(true, Ordering::SeqCst);
        self.end_stream();
        // Like a real peripheral, closing ends the link.
        self.inner.lost.cancel();
        Ok(())
    }
}

/// Builder for [`MockTransport`].
#[derive(Debug)]
pub struct MockTransportBuilder {
    address: Option<PeripheralAddress>,
    profile: Profile,
    connect_latency: Duration,
    connect_failure: Option<ConnectionFailureReason>,
    fail_write_at: Option<usize>,
    fail_subscribe: bool,
    fail_unsubscribe: bool,
    fail_close: bool,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            address: None,
            profile: Profile::airbox(),
            connect_latency: Duration::ZERO,
            connect_failure: None,
            fail_write_at: None,
            fail_subscribe: false,
            fail_unsubscribe: false,
            fail_close: false,
        }
    }
}

impl MockTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the peripheral address. Defaults to a random MAC.
    #[must_use]
    pub fn address(mut self, address: PeripheralAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the discovered profile. Defaults to [`Profile::airbox`].
    #[must_use]
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Delay every connect attempt.
    #[must_use]
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Fail every connect attempt with `reason`.
    #[must_use]
    pub fn fail_connect(mut self, reason: ConnectionFailureReason) -> Self {
        self.connect_failure = Some(reason);
        self
    }

    /// Fail the `n`-th write (one-based) on the link.
    #[must_use]
    pub fn fail_write_at(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    #[must_use]
    pub fn fail_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    #[must_use]
    pub fn fail_unsubscribe(mut self) -> Self {
        self.fail_unsubscribe = true;
        self
    }

    #[must_use]
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn build(self) -> MockTransport {
        let address = self
            .address
            .unwrap_or_else(|| PeripheralAddress::from(rand::random::<[u8; 6]>()));

        let inner = MockLinkInner {
            address,
            profile: self.profile,
            fail_write_at: self.fail_write_at,
            fail_subscribe: self.fail_subscribe,
            fail_unsubscribe: self.fail_unsubscribe,
            fail_close: self.fail_close,
            writes: Mutex::new(Vec::new()),
            write_attempts: AtomicUsize::new(0),
            subscriber: Mutex::new(None),
            subscribes: AtomicU32::new(0),
            unsubscribes: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            lost: CancellationToken::new(),
        };

        MockTransport {
            link: MockLink {
                inner: Arc::new(inner),
            },
            connect_latency: self.connect_latency,
            connect_failure: self.connect_failure,
            connects: AtomicU32::new(0),
        }
    }
}
