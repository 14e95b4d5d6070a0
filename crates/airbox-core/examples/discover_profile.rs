//! Connect to a device and print every attribute it exposes

use std::env;
use std::time::Duration;

use airbox_core::{
    AttributeHandles, BleTransport, ConnectionConfig, PeripheralAddress, PeripheralLink, Session,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let address: PeripheralAddress = if args.len() > 1 {
        args[1].parse()?
    } else {
        eprintln!("Usage: {} <ADDRESS>", args[0]);
        std::process::exit(1);
    };

    println!("Connecting to {}...", address);
    let deadline = Duration::from_secs(30);
    let transport = BleTransport::with_config(ConnectionConfig::within(deadline));
    let session = Session::open(&transport, &address, deadline).await?;
    println!("Connected!");

    let profile = session.link().discover().await?;
    println!("\n=== ATTRIBUTES ({}) ===\n", profile.len());
    for attribute in profile.iter() {
        match attribute.parent() {
            None => println!("Characteristic: {}", attribute.uuid()),
            Some(_) => println!("  Descriptor: {}", attribute.uuid()),
        }
    }

    match AttributeHandles::resolve(&profile) {
        Ok(handles) => println!(
            "\nAirbox attributes present (command {}, notify {}, config under {:?})",
            handles.command.uuid(),
            handles.notify.uuid(),
            handles.notify_config.parent()
        ),
        Err(e) => println!("\nNot an Airbox: {}", e),
    }

    session.close().await;
    println!("\nDisconnected.");
    Ok(())
}
