//! The single logical link to an Airbox peripheral.
//!
//! A [`Session`] walks through the phases of talking to the device:
//!
//! 1. [`Session::open`] connects within a deadline
//! 2. [`Session::discover_attributes`] resolves the protocol attributes
//! 3. [`Session::run_init_sequence`] writes the init frames
//! 4. [`Session::subscribe`] starts the notification task
//!
//! [`Session::close`] tears all of that down. It is idempotent and never
//! fails. If the link goes away for any other reason, the session's
//! [`DisconnectSignal`] fires.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use airbox_types::PeripheralAddress;
use airbox_types::protocol::{calibration_command, init_commands};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::profile::AttributeHandles;
use crate::traits::{DisconnectFuture, PeripheralLink, Transport};

/// Default deadline for [`Session::open`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Phase of a [`Session`].
///
/// `Closed` and `Failed` are terminal; once reached the state no longer
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet connecting.
    Unopened,
    /// Waiting for the transport to connect.
    Connecting,
    /// Resolving the protocol attributes.
    Discovering,
    /// Writing the init frames.
    Initializing,
    /// Subscribed; notifications flow into the handler.
    Streaming,
    /// [`Session::close`] is tearing the link down.
    Closing,
    /// Torn down after [`Session::close`].
    Closed,
    /// A setup step failed or the link was lost.
    Failed,
}

impl SessionState {
    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Connecting => "connecting",
            SessionState::Discovering => "discovering",
            SessionState::Initializing => "initializing",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Fires once when the link is lost without [`Session::close`] being called.
#[derive(Debug, Clone)]
pub struct DisconnectSignal {
    token: CancellationToken,
}

impl DisconnectSignal {
    /// Wait until the link is lost.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }

    /// Whether the link has already been lost.
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// An open link to one peripheral plus everything resolved on it.
///
/// Not `Clone`; share it behind an `Arc`.
pub struct Session<L: PeripheralLink> {
    link: L,
    state: Arc<watch::Sender<SessionState>>,
    handles: OnceLock<AttributeHandles>,
    closing: Arc<AtomicBool>,
    subscribed: AtomicBool,
    lost: CancellationToken,
    watcher: Mutex<Option<JoinHandle<()>>>,
    notifications: Mutex<Option<JoinHandle<()>>>,
}

impl<L: PeripheralLink> fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", self.link.address())
            .field("state", &self.state())
            .field("handles", &self.handles.get())
            .finish_non_exhaustive()
    }
}

impl<L: PeripheralLink> Session<L> {
    /// Connect to `address`, giving up after `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] with
    /// [`ConnectionFailureReason::Timeout`] when the deadline passes. Other
    /// transport errors are returned unchanged.
    #[tracing::instrument(level = "info", skip_all, fields(address = %address, timeout = ?connect_timeout))]
    pub async fn open<T>(
        transport: &T,
        address: &PeripheralAddress,
        connect_timeout: Duration,
    ) -> Result<Self>
    where
        T: Transport<Link = L>,
    {
        let (state, _) = watch::channel(SessionState::Unopened);
        transition(&state, SessionState::Connecting);

        info!("Connecting...");
        let link = match timeout(connect_timeout, transport.connect(address)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::connection_failed(
                    Some(address.to_string()),
                    ConnectionFailureReason::Timeout,
                ));
            }
        };
        info!("Connected");

        let state = Arc::new(state);
        let closing = Arc::new(AtomicBool::new(false));
        let lost = CancellationToken::new();

        let watcher = tokio::spawn(watch_link(
            link.disconnected(),
            address.clone(),
            Arc::clone(&closing),
            Arc::clone(&state),
            lost.clone(),
        ));

        Ok(Self {
            link,
            state,
            handles: OnceLock::new(),
            closing,
            subscribed: AtomicBool::new(false),
            lost,
            watcher: Mutex::new(Some(watcher)),
            notifications: Mutex::new(None),
        })
    }

    /// Address of the peripheral.
    pub fn address(&self) -> &PeripheralAddress {
        self.link.address()
    }

    /// The current phase.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe phase changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// A handle that fires when the link is lost unexpectedly.
    pub fn disconnect_signal(&self) -> DisconnectSignal {
        DisconnectSignal {
            token: self.lost.clone(),
        }
    }

    /// The underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Resolve the command, notify and notify configuration attributes.
    ///
    /// The result is cached; later calls return it without asking the link
    /// again.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address()))]
    pub async fn discover_attributes(&self) -> Result<AttributeHandles> {
        self.ensure_open()?;
        if let Some(handles) = self.handles.get() {
            return Ok(*handles);
        }

        transition(&self.state, SessionState::Discovering);
        let resolved = match self.link.discover().await {
            Ok(profile) => {
                info!(attributes = profile.len(), "Discovered profile");
                AttributeHandles::resolve(&profile)
            }
            Err(e) => Err(e),
        };

        match resolved {
            Ok(handles) => {
                debug!(
                    command = %handles.command.uuid(),
                    notify = %handles.notify.uuid(),
                    notify_config = %handles.notify_config.uuid(),
                    "Resolved attributes"
                );
                Ok(*self.handles.get_or_init(|| handles))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Write the init frames, in order, each acknowledged.
    ///
    /// # Errors
    ///
    /// The first failing write aborts the sequence with
    /// [`Error::InitFailed`].
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address()))]
    pub async fn run_init_sequence(&self) -> Result<()> {
        self.ensure_open()?;
        let handles = self.handles()?;
        transition(&self.state, SessionState::Initializing);

        for (index, (role, frame)) in init_commands().into_iter().enumerate() {
            let step = index + 1;
            let handle = handles.get(role);
            debug!(step, %role, len = frame.len(), "Writing init frame");

            if let Err(source) = self.link.write(&handle, frame.as_bytes(), true).await {
                return Err(self.fail(Error::InitFailed {
                    step,
                    role,
                    source: Box::new(source),
                }));
            }
        }

        info!("Init sequence complete");
        Ok(())
    }

    /// Subscribe to the notify characteristic.
    ///
    /// `on_notification` runs on a dedicated task, once per frame, in
    /// arrival order. The task stops when the stream ends or the session is
    /// closed.
    #[tracing::instrument(level = "info", skip_all, fields(address = %self.address()))]
    pub async fn subscribe<F>(&self, mut on_notification: F) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.ensure_open()?;
        let notify = self.handles()?.notify;

        let mut stream = match self.link.subscribe(&notify).await {
            Ok(stream) => stream,
            Err(e) => {
                return Err(self.fail(Error::SubscribeFailed {
                    uuid: notify.uuid(),
                    reason: e.to_string(),
                }));
            }
        };
        self.subscribed.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                on_notification(&frame);
            }
            debug!("Notification stream ended");
        });

        if let Some(previous) = self.notifications.lock().await.replace(task) {
            previous.abort();
        }

        transition(&self.state, SessionState::Streaming);
        info!(characteristic = %notify.uuid(), "Subscribed to notifications");
        Ok(())
    }

    /// Write the calibration frame to the command characteristic.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address()))]
    pub async fn calibrate(&self) -> Result<()> {
        self.ensure_open()?;
        let command = self.handles()?.command;
        let frame = calibration_command();
        self.link.write(&command, frame.as_bytes(), true).await?;
        info!("Calibration command sent");
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Stops the notification task, unsubscribes and releases the link.
    /// Teardown failures are logged, not returned. Only the first call does
    /// anything; the disconnect signal does not fire for a closed session.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address()))]
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            debug!("Session already closing");
            return;
        }
        transition(&self.state, SessionState::Closing);

        if let Some(task) = self.notifications.lock().await.take() {
            task.abort();
        }

        if self.subscribed.swap(false, Ordering::SeqCst)
            && let Some(handles) = self.handles.get()
            && let Err(e) = self.link.unsubscribe(&handles.notify).await
        {
            warn!(error = %e, "Failed to unsubscribe");
        }

        if let Err(e) = self.link.close().await {
            warn!(error = %e, "Failed to close link");
        }

        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }

        transition(&self.state, SessionState::Closed);
        info!("Session closed");
    }

    fn handles(&self) -> Result<AttributeHandles> {
        self.handles.get().copied().ok_or(Error::AttributesNotResolved)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self.lost.is_cancelled() {
            return Err(Error::LinkLost {
                address: self.address().clone(),
            });
        }
        Ok(())
    }

    fn fail(&self, err: Error) -> Error {
        transition(&self.state, SessionState::Failed);
        err
    }
}

async fn watch_link(
    disconnected: DisconnectFuture,
    address: PeripheralAddress,
    closing: Arc<AtomicBool>,
    state: Arc<watch::Sender<SessionState>>,
    lost: CancellationToken,
) {
    disconnected.await;
    if closing.load(Ordering::SeqCst) {
        debug!(%address, "Link closed");
        return;
    }
    error!(%address, "Link lost");
    transition(&state, SessionState::Failed);
    lost.cancel();
}

impl<L: PeripheralLink> Drop for Session<L> {
    fn drop(&mut self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            address = %self.link.address(),
            "Session dropped without close(); aborting its tasks"
        );
        for slot in [&self.notifications, &self.watcher] {
            if let Ok(mut task) = slot.try_lock()
                && let Some(task) = task.take()
            {
                task.abort();
            }
        }
    }
}
