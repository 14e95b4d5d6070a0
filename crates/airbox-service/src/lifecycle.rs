//! Gateway lifecycle.
//!
//! A run is either a one-shot calibration or a streaming session:
//!
//! ```text
//! calibrate:  open -> discover -> write 0xad -> close
//! streaming:  open -> discover -> init -> subscribe -> wait -> close
//! ```
//!
//! While streaming, the controller waits for whichever comes first: an
//! external termination request or the link dropping. Either way the
//! session is closed exactly once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use airbox_core::protocol::decode_notification;
use airbox_core::{
    Error, PeripheralAddress, ReadingUpdater, Result, Session, SharedSession, Transport,
};

use crate::api;
use crate::state::AppState;

/// How a streaming run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Termination was requested.
    Terminated,
    /// The peripheral went away on its own.
    LinkLost,
}

impl Outcome {
    /// Process exit status for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Terminated => 0,
            Outcome::LinkLost => 2,
        }
    }
}

/// Drives one session against one peripheral.
pub struct Controller<T: Transport> {
    transport: T,
    address: PeripheralAddress,
    connect_timeout: Duration,
    session: Option<SharedSession<T::Link>>,
}

impl<T: Transport> std::fmt::Debug for Controller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("address", &self.address)
            .field("connect_timeout", &self.connect_timeout)
            .field("session", &self.session.as_ref().map(|s| s.state()))
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Controller<T> {
    pub fn new(transport: T, address: PeripheralAddress, connect_timeout: Duration) -> Self {
        Self {
            transport,
            address,
            connect_timeout,
            session: None,
        }
    }

    /// The session, once streaming has started.
    pub fn session(&self) -> Option<&SharedSession<T::Link>> {
        self.session.as_ref()
    }

    /// Send the calibration command and disconnect.
    ///
    /// The init sequence is skipped and nothing is subscribed.
    pub async fn calibrate(&self) -> Result<()> {
        let session = self.open().await?;

        let result = async {
            session.discover_attributes().await?;
            session.calibrate().await
        }
        .await;

        session.close().await;
        if result.is_ok() {
            info!(address = %self.address, "Calibration complete");
        }
        result
    }

    /// Connect, initialize and start feeding `updater`.
    ///
    /// Frames that fail to decode are logged and dropped. On error the
    /// session is already torn down.
    pub async fn start_streaming(&mut self, updater: ReadingUpdater) -> Result<()> {
        let session = Arc::new(self.open().await?);

        let result = async {
            session.discover_attributes().await?;
            session.run_init_sequence().await?;
            session
                .subscribe(move |frame| match decode_notification(frame) {
                    Ok(reading) => {
                        debug!(%reading, "Reading");
                        updater.update(reading);
                    }
                    Err(e) => warn!(error = %e, "Dropping notification"),
                })
                .await
        }
        .await;

        if let Err(e) = result {
            session.close().await;
            return Err(e);
        }

        info!(address = %self.address, "Streaming readings");
        self.session = Some(session);
        Ok(())
    }

    /// Wait for `shutdown` or link loss, then close the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if streaming was never started.
    pub async fn run_until_shutdown<F>(&self, shutdown: F) -> Result<Outcome>
    where
        F: Future<Output = ()>,
    {
        let session = self.session.as_ref().ok_or(Error::NotConnected)?;
        let signal = session.disconnect_signal();

        let outcome = tokio::select! {
            _ = shutdown => {
                info!("Shutdown requested");
                Outcome::Terminated
            }
            _ = signal.fired() => {
                error!(address = %self.address, "Peripheral disconnected");
                Outcome::LinkLost
            }
        };

        session.close().await;
        Ok(outcome)
    }

    async fn open(&self) -> Result<Session<T::Link>> {
        Session::open(&self.transport, &self.address, self.connect_timeout).await
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C elsewhere).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Bind the first of `addrs` that works.
///
/// Host names are resolved here. The last bind error is returned when none
/// of them can be bound.
pub async fn bind_listener(addrs: &[String]) -> std::io::Result<TcpListener> {
    let mut last_error = None;
    for addr in addrs {
        match TcpListener::bind(addr.as_str()).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(%addr, error = %e, "Bind failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "no bind address given")
    }))
}

/// Serve the HTTP API until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Serving on http://{}", addr);
    }
    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use airbox_core::mock::notification_frame;
    use airbox_core::{
        ConnectionFailureReason, MockTransport, SensorReading, SessionState, reading_store, uuids,
    };
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    fn controller(transport: MockTransport) -> Controller<MockTransport> {
        let address = transport.address().clone();
        Controller::new(transport, address, Duration::from_secs(5))
    }

    #[test]
    fn test_outcome_exit_code() {
        assert_eq!(Outcome::Terminated.exit_code(), 0);
        assert_eq!(Outcome::LinkLost.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_calibrate_writes_only_calibration_frame() {
        let transport = MockTransport::new();
        let link = transport.link();
        let controller = controller(transport);

        controller.calibrate().await.unwrap();

        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, vec![0xad]);
        assert_eq!(writes[0].handle.uuid(), uuids::COMMAND);
        assert!(writes[0].with_response);
        assert_eq!(link.subscribe_count(), 0);
        assert_eq!(link.close_count(), 1);
    }

    #[tokio::test]
    async fn test_calibrate_write_failure_still_closes() {
        let transport = MockTransport::builder().fail_write_at(1).build();
        let link = transport.link();
        let controller = controller(transport);

        assert!(controller.calibrate().await.is_err());
        assert_eq!(link.close_count(), 1);
    }

    #[tokio::test]
    async fn test_streaming_updates_store() {
        let transport = MockTransport::new();
        let link = transport.link();
        let mut controller = controller(transport);
        let (updater, mut store) = reading_store();

        controller.start_streaming(updater).await.unwrap();
        assert_eq!(
            controller.session().unwrap().state(),
            SessionState::Streaming
        );
        // The three init frames, in order, all acknowledged.
        let writes = link.writes();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|w| w.with_response));

        link.notify(notification_frame(100, 20, 10, 200));
        let latest = timeout(WAIT, store.changed()).await.unwrap().unwrap();
        assert_eq!(latest.reading.co2, 50);
        assert!((latest.reading.temperature - 10.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_decode_failure_leaves_store_unchanged() {
        let transport = MockTransport::new();
        let link = transport.link();
        let mut controller = controller(transport);
        let (updater, mut store) = reading_store();
        controller.start_streaming(updater).await.unwrap();

        link.notify(notification_frame(200, 0, 0, 550));
        timeout(WAIT, store.changed()).await.unwrap().unwrap();
        let before = store.latest();

        link.notify(vec![0u8; 17]);
        link.notify(notification_frame(201, 0, 0, 551));
        let after = timeout(WAIT, store.changed()).await.unwrap().unwrap();

        assert_eq!(after.updates, before.updates + 1);
        assert_eq!(after.reading.co2, 401);
    }

    #[tokio::test]
    async fn test_init_failure_is_fatal_and_tears_down() {
        let transport = MockTransport::builder().fail_write_at(2).build();
        let link = transport.link();
        let mut controller = controller(transport);
        let (updater, store) = reading_store();

        let err = controller.start_streaming(updater).await.unwrap_err();

        assert!(matches!(err, Error::InitFailed { step: 2, .. }));
        assert!(controller.session().is_none());
        assert_eq!(link.close_count(), 1);
        assert_eq!(link.subscribe_count(), 0);
        assert_eq!(store.snapshot(), SensorReading::default());
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let transport = MockTransport::builder()
            .fail_connect(ConnectionFailureReason::Rejected)
            .build();
        let link = transport.link();
        let mut controller = controller(transport);
        let (updater, _store) = reading_store();

        let err = controller.start_streaming(updater).await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(link.close_count(), 0);
    }

    #[tokio::test]
    async fn test_run_without_session() {
        let controller = controller(MockTransport::new());
        let result = controller.run_until_shutdown(async {}).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_shutdown_request_terminates() {
        let transport = MockTransport::new();
        let link = transport.link();
        let mut controller = controller(transport);
        let (updater, _store) = reading_store();
        controller.start_streaming(updater).await.unwrap();

        let outcome = controller.run_until_shutdown(async {}).await.unwrap();

        assert_eq!(outcome, Outcome::Terminated);
        assert_eq!(link.close_count(), 1);
        assert_eq!(link.unsubscribe_count(), 1);
        assert_eq!(
            controller.session().unwrap().state(),
            SessionState::Closed
        );
    }

    #[tokio::test]
    async fn test_link_loss_ends_run() {
        let transport = MockTransport::new();
        let link = transport.link();
        let mut controller = controller(transport);
        let (updater, _store) = reading_store();
        controller.start_streaming(updater).await.unwrap();

        let dropper = link.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            dropper.drop_link();
        });

        let outcome = timeout(
            WAIT,
            controller.run_until_shutdown(std::future::pending::<()>()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome, Outcome::LinkLost);
        assert_eq!(link.close_count(), 1);
    }

    #[tokio::test]
    async fn test_both_triggers_single_teardown() {
        let transport = MockTransport::new();
        let link = transport.link();
        let mut controller = controller(transport);
        let (updater, _store) = reading_store();
        controller.start_streaming(updater).await.unwrap();

        let signal = controller.session().unwrap().disconnect_signal();
        link.drop_link();
        timeout(WAIT, signal.fired()).await.unwrap();

        let outcome = controller.run_until_shutdown(async {}).await.unwrap();
        assert!(matches!(outcome, Outcome::Terminated | Outcome::LinkLost));

        // A second shutdown finds the session already closed.
        controller.run_until_shutdown(async {}).await.unwrap();
        controller.session().unwrap().close().await;

        assert_eq!(link.close_count(), 1);
    }

    #[tokio::test]
    async fn test_bind_listener_resolves_host_names() {
        let listener = bind_listener(&["localhost:0".to_string()]).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_listener_falls_back() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_addr = taken.local_addr().unwrap().to_string();

        let listener = bind_listener(&[taken_addr.clone(), "127.0.0.1:0".to_string()])
            .await
            .unwrap();
        assert_ne!(listener.local_addr().unwrap().to_string(), taken_addr);

        assert!(bind_listener(&[taken_addr]).await.is_err());
        assert!(bind_listener(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_updater, store) = reading_store();
        let token = CancellationToken::new();

        let server = tokio::spawn(serve(listener, AppState::new(store), token.clone()));
        token.cancel();

        timeout(WAIT, server).await.unwrap().unwrap().unwrap();
    }
}
