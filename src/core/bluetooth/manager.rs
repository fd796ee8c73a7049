//! Bluetooth manager for the headset link
//! This module provides the main interface for bluetooth operations: discovery,
//! the single active connection, capability invocation and time announcements.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::announcer::{SpeechSink, TimeAnnouncer};
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::events::{EventEmitter, LinkEvent, Subscription};
use crate::core::bluetooth::invocation::{InvocationOutcome, Operation};
use crate::core::bluetooth::scanner::{self, BluetoothScanner};
use crate::core::bluetooth::transport::{AdapterEvent, Adapters, TransportAdapter};
use crate::core::bluetooth::types::{
    CapabilityRecord, ConnectionSnapshot, ConnectionStatus, DeviceRecord, TransportFamily,
};
use crate::error::{LinkError, Notice};
use crate::utils::TaskHandle;

/// Manages Bluetooth operations
pub struct BluetoothManager {
    adapters: Adapters,
    /// Discovery results for both transport families
    scanner: BluetoothScanner,
    /// State machine of the active connection
    connection: ConnectionManager,
    announcer: TimeAnnouncer,
    events: EventEmitter,
    /// Root of every background task owned by the manager
    shutdown: CancellationToken,
    /// One adapter event pump per transport family
    pumps: Vec<TaskHandle>,
}

impl BluetoothManager {
    /// Creates a new BluetoothManager and starts listening to both adapters.
    pub async fn new(adapters: Adapters, config: &AppConfig, speech: Arc<dyn SpeechSink>) -> Self {
        let shutdown = CancellationToken::new();
        let events = EventEmitter::new(EVENT_CHANNEL_CAPACITY);
        let scanner = BluetoothScanner::new(adapters.clone(), config.link.scan_duration());
        let connection = ConnectionManager::new(
            adapters.clone(),
            events.clone(),
            config.link.connection_settings(),
            shutdown.clone(),
        );
        let announcer = TimeAnnouncer::new(
            speech,
            connection.clone(),
            events.clone(),
            config.link.broadcast_interval(),
            shutdown.clone(),
        );
        announcer.configure(&config.speech).await;

        let pumps = [TransportFamily::Advertising, TransportFamily::Classic]
            .into_iter()
            .map(|family| {
                spawn_event_pump(
                    adapters.for_family(family).clone(),
                    scanner.clone(),
                    connection.clone(),
                    events.clone(),
                    &shutdown,
                )
            })
            .collect();

        let manager = Self {
            adapters,
            scanner,
            connection,
            announcer,
            events,
            shutdown,
            pumps,
        };
        if config.link.auto_broadcast {
            manager.set_auto_broadcast(true);
        }
        info!("Bluetooth manager ready");
        manager
    }

    /// Registers a listener for link events
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Raw adapter events of one family, including notification payloads
    pub fn adapter_events(&self, family: TransportFamily) -> broadcast::Receiver<AdapterEvent> {
        self.adapters.for_family(family).events()
    }

    /// Scans for devices of the given family
    pub async fn start_scan(&self, family: TransportFamily) -> Result<(), LinkError> {
        self.scanner.start_scan(family).await?;
        self.events.emit(LinkEvent::ScanStarted(family));
        Ok(())
    }

    /// Lists paired and nearby Classic devices
    pub async fn collect_classic_devices(&self) -> Result<Vec<DeviceRecord>, LinkError> {
        let family = TransportFamily::Classic;
        self.events.emit(LinkEvent::ScanStarted(family));
        let result = self.scanner.collect_classic_devices().await;
        self.events.emit(LinkEvent::ScanComplete(family));
        result.map(scanner::rank)
    }

    pub fn is_scanning(&self, family: TransportFamily) -> bool {
        self.scanner.is_scanning(family)
    }

    /// Discovered devices of one family, audio devices first
    pub fn ranked_devices(&self, family: TransportFamily) -> Vec<DeviceRecord> {
        self.scanner.ranked_devices(family)
    }

    /// Connects to a device
    pub async fn connect(&self, device: &DeviceRecord) -> Result<ConnectionSnapshot, LinkError> {
        self.connection.connect(device).await
    }

    /// Connects to a previously discovered device with the given ID
    pub async fn connect_device(
        &self,
        family: TransportFamily,
        device_id: &str,
    ) -> Result<ConnectionSnapshot, LinkError> {
        let device = self
            .scanner
            .devices(family)
            .into_iter()
            .find(|device| device.id == device_id)
            .ok_or_else(|| LinkError::ConnectFailed {
                device_id: device_id.to_string(),
                detail: "device not found".to_string(),
            })?;
        self.connect(&device).await
    }

    /// Reconnects to the last connected device
    pub async fn reconnect(&self) -> Result<ConnectionSnapshot, LinkError> {
        self.connection.reconnect().await
    }

    /// Disconnects from the currently connected device
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.connection.disconnect().await
    }

    /// Runs a read, write or notify operation on a characteristic
    pub async fn invoke(
        &self,
        capability: &CapabilityRecord,
        operation: Operation,
    ) -> Result<InvocationOutcome, LinkError> {
        self.connection.invoke(capability, operation).await
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.connection.status().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Current connection, capabilities and standard readings
    pub async fn snapshot(&self) -> ConnectionSnapshot {
        self.connection.snapshot().await
    }

    pub async fn last_device(&self) -> Option<DeviceRecord> {
        self.connection.last_device().await
    }

    /// Speaks the current time through the connected headset
    pub async fn announce_time(&self) -> Result<String, LinkError> {
        self.announcer.announce_now().await
    }

    /// Turns periodic time announcements on or off
    pub fn set_auto_broadcast(&self, enabled: bool) {
        self.announcer.set_auto(enabled);
    }

    pub fn is_auto_broadcast(&self) -> bool {
        self.announcer.is_auto()
    }

    /// Stops every background task: liveness monitor, announcements and
    /// adapter event pumps. The connection itself is left as is.
    pub async fn shutdown(&mut self) {
        info!("Shutting down Bluetooth manager");
        self.connection.stop_monitoring().await;
        self.announcer.stop();
        self.shutdown.cancel();
        self.pumps.clear();
    }
}

impl Drop for BluetoothManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Forwards one adapter's events into discovery and the state machine.
fn spawn_event_pump(
    adapter: Arc<dyn TransportAdapter>,
    scanner: BluetoothScanner,
    connection: ConnectionManager,
    events: EventEmitter,
    shutdown: &CancellationToken,
) -> TaskHandle {
    let family = adapter.family();
    let mut receiver = adapter.events();
    TaskHandle::spawn(shutdown, move |token| async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("{} adapter events lagged, {} skipped", family, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            handle_adapter_event(family, event, &scanner, &connection, &events).await;
        }
        debug!("{} adapter event pump stopped", family);
    })
}

async fn handle_adapter_event(
    family: TransportFamily,
    event: AdapterEvent,
    scanner: &BluetoothScanner,
    connection: &ConnectionManager,
    events: &EventEmitter,
) {
    match event {
        AdapterEvent::StateChanged { powered } => {
            info!("{} adapter powered: {}", family, powered);
            if !powered {
                events.emit(LinkEvent::Notice(Notice::radio_off(family)));
            }
        }
        AdapterEvent::DeviceDiscovered(record) => {
            scanner.on_device_observed(record.clone());
            events.emit(LinkEvent::DeviceFound(record));
        }
        AdapterEvent::ScanStopped => {
            scanner.finish_scan(family);
            events.emit(LinkEvent::ScanComplete(family));
        }
        AdapterEvent::Connected { device_id } => {
            debug!("{} adapter reports {} connected", family, device_id);
        }
        AdapterEvent::Disconnected { device_id } => {
            connection.on_adapter_disconnected(family, &device_id).await;
        }
        AdapterEvent::Bonded { device_id } => {
            info!("Device {} bonded", device_id);
            if family == TransportFamily::Classic {
                if let Err(e) = scanner.refresh_bonded().await {
                    warn!("Failed to refresh paired devices: {}", e);
                }
            }
            events.emit(LinkEvent::Bonded { device_id });
        }
        AdapterEvent::Notification { .. } => {}
    }
}
