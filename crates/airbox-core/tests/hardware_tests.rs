//! Hardware integration tests for airbox-core
//!
//! These tests require an Airbox in range and should be run with:
//! ```
//! cargo test --package airbox-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the device via environment variable:
//! - `AIRBOX_DEVICE`: MAC address (Linux/Windows) or CoreBluetooth UUID (macOS)
//!
//! Example:
//! ```
//! AIRBOX_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package airbox-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::time::Duration;

use airbox_core::protocol::decode_notification;
use airbox_core::{
    BleTransport, ConnectionConfig, PeripheralAddress, Session, SessionState, reading_store,
};
use tokio::time::timeout;

/// Connect deadline for real hardware; scanning can take a while.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the first notification.
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(30);

fn transport() -> BleTransport {
    BleTransport::with_config(ConnectionConfig::within(CONNECT_TIMEOUT))
}

fn get_device() -> Option<PeripheralAddress> {
    env::var("AIRBOX_DEVICE")
        .ok()
        .and_then(|s| s.parse().ok())
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_discover_attributes() {
    let Some(address) = get_device() else {
        println!("AIRBOX_DEVICE not set, skipping");
        return;
    };

    let session = Session::open(&transport(), &address, CONNECT_TIMEOUT)
        .await
        .expect("connect");
    let handles = session.discover_attributes().await.expect("discover");

    println!("Command:       {:?}", handles.command);
    println!("Notify:        {:?}", handles.notify);
    println!("Notify config: {:?}", handles.notify_config);

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_stream_first_reading() {
    let Some(address) = get_device() else {
        println!("AIRBOX_DEVICE not set, skipping");
        return;
    };

    let session = Session::open(&transport(), &address, CONNECT_TIMEOUT)
        .await
        .expect("connect");
    session.discover_attributes().await.expect("discover");
    session.run_init_sequence().await.expect("init");

    let (updater, mut store) = reading_store();
    session
        .subscribe(move |frame| match decode_notification(frame) {
            Ok(reading) => updater.update(reading),
            Err(e) => println!("Dropped frame: {}", e),
        })
        .await
        .expect("subscribe");

    let latest = timeout(NOTIFICATION_TIMEOUT, store.changed())
        .await
        .expect("no notification in time")
        .expect("store closed");
    println!("First reading: {}", latest.reading);
    assert!(latest.reading.co2 > -150);

    session.close().await;
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_close_is_quiet() {
    let Some(address) = get_device() else {
        println!("AIRBOX_DEVICE not set, skipping");
        return;
    };

    let session = Session::open(&transport(), &address, CONNECT_TIMEOUT)
        .await
        .expect("connect");
    let signal = session.disconnect_signal();

    session.close().await;
    session.close().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!signal.is_fired());
}
