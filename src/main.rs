use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use headset_link_lib::config::AppConfig;
use headset_link_lib::core::bluetooth::{
    Adapters, BluestTransport, ConnectionSnapshot, LinkEvent, Subscription, TransportAdapter,
    TransportFamily, UnsupportedTransport,
};
use headset_link_lib::core::LogSpeechSink;
use headset_link_lib::{logging, BluetoothManager};
use log::{info, warn};

const APP_DIR_NAME: &str = "headset-link";

fn usage() -> String {
    "usage: headset-link [ble|classic] [device-id]".to_string()
}

fn parse_family(arg: Option<&str>) -> Result<TransportFamily> {
    match arg.map(str::to_ascii_lowercase).as_deref() {
        None | Some("ble") => Ok(TransportFamily::Advertising),
        Some("classic") => Ok(TransportFamily::Classic),
        Some(other) => Err(anyhow!("unknown transport '{}'\n{}", other, usage())),
    }
}

async fn advertising_adapter() -> Arc<dyn TransportAdapter> {
    match BluestTransport::new().await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            warn!("BLE unavailable: {}", e);
            Arc::new(UnsupportedTransport::new(TransportFamily::Advertising))
        }
    }
}

#[cfg(target_os = "linux")]
async fn classic_adapter(config: &AppConfig) -> Arc<dyn TransportAdapter> {
    use headset_link_lib::core::bluetooth::BluezClassicTransport;

    match BluezClassicTransport::new(config.link.scan_duration()).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            warn!("Classic Bluetooth unavailable: {}", e);
            Arc::new(UnsupportedTransport::new(TransportFamily::Classic))
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn classic_adapter(_: &AppConfig) -> Arc<dyn TransportAdapter> {
    Arc::new(UnsupportedTransport::new(TransportFamily::Classic))
}

/// Waits for the scan started on `family` to report completion.
async fn wait_for_scan(events: &mut Subscription, family: TransportFamily, limit: Duration) {
    let finished = async {
        while let Some(event) = events.recv().await {
            if let LinkEvent::ScanComplete(done) = event {
                if done == family {
                    break;
                }
            }
        }
    };
    if tokio::time::timeout(limit, finished).await.is_err() {
        warn!("Scan did not report completion within {} seconds", limit.as_secs());
    }
}

fn print_snapshot(snapshot: &ConnectionSnapshot) {
    if let Some(device) = &snapshot.device {
        println!("Connected to {} ({})", device.display_name(), device.id);
    }
    println!("Capabilities:");
    for capability in &snapshot.capabilities {
        println!(
            "  {} / {} [{:?}] {:?}",
            capability.service_name,
            capability.characteristic_name,
            capability.role,
            capability.properties
        );
    }
    if let Some(level) = snapshot.readings.battery_level {
        println!("Battery: {}%", level);
    }
    for (kind, value) in &snapshot.readings.device_info {
        println!("{}: {}", kind.name(), value);
    }
    if snapshot.unreadable_fields > 0 {
        println!("{} standard fields could not be read", snapshot.unreadable_fields);
    }
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::StatusChanged(status) => println!("status: {}", status),
        LinkEvent::Interrupted(device) => {
            println!("Connection to {} was lost", device.display_name())
        }
        LinkEvent::Notice(notice) => println!("{}: {}", notice.title, notice.message),
        LinkEvent::Announced(text) => println!("announced: {}", text),
        other => info!("{:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let family = parse_family(args.first().map(String::as_str))?;
    let device_id = args.get(1).cloned();

    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("no configuration directory on this platform"))?
        .join(APP_DIR_NAME);
    // Read before the logger exists so the configured level applies; report after.
    let stored = AppConfig::read_config(&config_dir).await?;
    let config = stored.clone().unwrap_or_default();
    if logging::init(&config.log_level).is_err() {
        eprintln!("Logger already initialized");
    }
    if stored.is_none() {
        warn!(
            "Config file not found at {:?}, using default.",
            AppConfig::file_path(&config_dir)
        );
    }
    info!("Starting headset link, config directory {:?}", config_dir);

    let adapters = Adapters::new(advertising_adapter().await, classic_adapter(&config).await);
    let mut manager =
        BluetoothManager::new(adapters, &config, Arc::new(LogSpeechSink)).await;
    let mut events = manager.subscribe();

    let devices = match family {
        TransportFamily::Advertising => {
            manager.start_scan(family).await?;
            wait_for_scan(&mut events, family, config.link.scan_duration() * 2).await;
            manager.ranked_devices(family)
        }
        TransportFamily::Classic => manager.collect_classic_devices().await?,
    };
    for device in &devices {
        println!(
            "{:<40} {:<24} rssi {:>5} {}",
            device.id,
            device.display_name(),
            device.rssi.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            if device.bonded { "paired" } else { "" }
        );
    }

    let Some(device_id) = device_id else {
        manager.shutdown().await;
        return Ok(());
    };

    let snapshot = manager.connect_device(family, &device_id).await?;
    print_snapshot(&snapshot);
    events.drain();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }
    }

    if let Err(e) = manager.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    manager.shutdown().await;
    Ok(())
}
