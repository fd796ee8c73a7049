//! BLE transport backed by bluest
//! Scans for advertising devices, connects, introspects GATT services and
//! forwards notifications and link drops to the adapter event stream.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bluest::error::ErrorKind;
use bluest::{Adapter, AdapterEvent as RadioEvent, Characteristic, ConnectionEvent, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::transport::{
    report_scan_end, AdapterEvent, TransportAdapter, TransportError,
};
use crate::core::bluetooth::types::{
    DeviceHandle, DeviceRecord, Introspection, Property, RawCharacteristic, TransportFamily,
};
use crate::utils::TaskHandle;

impl From<bluest::Error> for TransportError {
    fn from(e: bluest::Error) -> Self {
        match e.kind() {
            ErrorKind::AdapterUnavailable | ErrorKind::NotReady => {
                TransportError::Unavailable(e.to_string())
            }
            ErrorKind::NotSupported => TransportError::Unsupported(e.to_string()),
            _ => TransportError::Failed(e.to_string()),
        }
    }
}

#[derive(Default)]
struct BackgroundTasks {
    scan: Option<TaskHandle>,
    /// Link watchers keyed by device id
    watchers: HashMap<String, TaskHandle>,
    /// Notification forwarders keyed by (device id, characteristic id)
    notifications: HashMap<(String, String), TaskHandle>,
}

/// BLE adapter using the platform's native stack through bluest
pub struct BluestTransport {
    adapter: Adapter,
    /// Devices seen during scans, keyed by id
    devices: Arc<Mutex<HashMap<String, Device>>>,
    events: broadcast::Sender<AdapterEvent>,
    tasks: Mutex<BackgroundTasks>,
    shutdown: CancellationToken,
    _radio_watcher: TaskHandle,
}

impl BluestTransport {
    /// Opens the default adapter. Does not wait for the radio to power on.
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| TransportError::Unavailable("No Bluetooth adapter found".to_string()))?;
        info!("Bluetooth adapter opened");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let radio_watcher = Self::spawn_radio_watcher(adapter.clone(), events.clone(), &shutdown);

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            events,
            tasks: Mutex::new(BackgroundTasks::default()),
            shutdown,
            _radio_watcher: radio_watcher,
        })
    }

    fn tasks(&self) -> MutexGuard<'_, BackgroundTasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn device(&self, device_id: &str) -> Result<Device, TransportError> {
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(device_id)
            .cloned()
            .ok_or_else(|| TransportError::DeviceNotFound(device_id.to_string()))
    }

    fn spawn_radio_watcher(
        adapter: Adapter,
        events: broadcast::Sender<AdapterEvent>,
        shutdown: &CancellationToken,
    ) -> TaskHandle {
        TaskHandle::spawn(shutdown, move |token| async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Adapter state events unavailable: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(RadioEvent::Available)) => {
                            let _ = events.send(AdapterEvent::StateChanged { powered: true });
                        }
                        Some(Ok(RadioEvent::Unavailable)) => {
                            let _ = events.send(AdapterEvent::StateChanged { powered: false });
                        }
                        Some(Err(e)) => warn!("Adapter state event error: {}", e),
                        None => break,
                    },
                }
            }
        })
    }

    /// Builds the record for a device and remembers its handle.
    async fn observe(
        devices: &Mutex<HashMap<String, Device>>,
        device: Device,
        rssi: Option<i16>,
        advertised_name: Option<String>,
    ) -> DeviceRecord {
        let id = device.id().to_string();
        let name = device.name().ok().or(advertised_name);
        let bonded = device.is_paired().await.unwrap_or(false);
        let record = DeviceRecord::new(id.clone(), name, TransportFamily::Advertising)
            .with_rssi(rssi)
            .bonded(bonded)
            .with_address(extract_mac_address(&id));
        devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, device);
        record
    }

    async fn internal_scan_task(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        events: broadcast::Sender<AdapterEvent>,
        services: Vec<Uuid>,
        duration: Duration,
        allow_duplicates: bool,
        cancel_token: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut seen = HashSet::new();

        // Already connected devices do not advertise.
        for device in adapter.connected_devices().await? {
            let record = Self::observe(&devices, device, None, None).await;
            seen.insert(record.id.clone());
            let _ = events.send(AdapterEvent::DeviceDiscovered(record));
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&services).await?;
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = &mut deadline => break,
                result = scan_stream.next() => match result {
                    Some(discovered) => {
                        let name = discovered.adv_data.local_name.clone();
                        let record =
                            Self::observe(&devices, discovered.device, discovered.rssi, name).await;
                        if !allow_duplicates && !seen.insert(record.id.clone()) {
                            continue;
                        }
                        let _ = events.send(AdapterEvent::DeviceDiscovered(record));
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Emits `Disconnected` when the platform reports the link dropped.
    fn spawn_link_watcher(&self, device: Device) -> TaskHandle {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        TaskHandle::spawn(&self.shutdown, move |token| async move {
            let device_id = device.id().to_string();
            let mut stream = match adapter.device_connection_events(&device).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("No connection events for {}: {}", device_id, e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = stream.next() => match event {
                        Some(ConnectionEvent::Connected) => {
                            let device_id = device_id.clone();
                            let _ = events.send(AdapterEvent::Connected { device_id });
                        }
                        Some(ConnectionEvent::Disconnected) => {
                            let device_id = device_id.clone();
                            let _ = events.send(AdapterEvent::Disconnected { device_id });
                        }
                        None => break,
                    },
                }
            }
        })
    }

    async fn characteristic(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
    ) -> Result<Characteristic, TransportError> {
        let device = self.device(device_id)?;
        let not_found = || TransportError::CharacteristicNotFound {
            service: service.to_string(),
            characteristic: characteristic.to_string(),
        };
        let service_uuid = Uuid::parse_str(service).map_err(|_| not_found())?;
        let characteristic_uuid = Uuid::parse_str(characteristic).map_err(|_| not_found())?;

        let services = device.services().await?;
        let gatt_service = services
            .iter()
            .find(|s| s.uuid() == service_uuid)
            .ok_or_else(not_found)?;
        gatt_service
            .characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid() == characteristic_uuid)
            .ok_or_else(not_found)
    }
}

impl Drop for BluestTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl TransportAdapter for BluestTransport {
    fn family(&self) -> TransportFamily {
        TransportFamily::Advertising
    }

    async fn is_enabled(&self) -> bool {
        self.adapter.is_available().await.unwrap_or(false)
    }

    async fn scan(
        &self,
        filter: &[String],
        duration: Duration,
        allow_duplicates: bool,
    ) -> Result<(), TransportError> {
        if !self.is_enabled().await {
            return Err(TransportError::Unavailable("Bluetooth is turned off".to_string()));
        }
        let services: Vec<Uuid> = filter
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect();

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let events = self.events.clone();
        let handle = TaskHandle::spawn(&self.shutdown, move |token| async move {
            if let Err(e) = Self::internal_scan_task(
                adapter,
                devices,
                events.clone(),
                services,
                duration,
                allow_duplicates,
                token.clone(),
            )
            .await
            {
                error!("Bluetooth scan failed: {}", e);
            }
            report_scan_end(&events, &token);
        });
        // Replacing the handle cancels a scan that is still running.
        self.tasks().scan = Some(handle);
        info!("Device scan task started.");
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        let mut records = Vec::new();
        for device in self.adapter.connected_devices().await? {
            let record = Self::observe(&self.devices, device, None, None).await;
            if record.bonded {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn discover(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        Err(TransportError::Unsupported(
            "BLE devices are found by scanning".to_string(),
        ))
    }

    async fn connect(&self, device_id: &str) -> Result<DeviceHandle, TransportError> {
        let device = self.device(device_id)?;
        let name = device.name().ok();
        info!("Device details - ID: {}, Name: {:?}", device_id, name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device_id);
            self.adapter.connect_device(&device).await?;
        }
        let watcher = self.spawn_link_watcher(device);
        self.tasks().watchers.insert(device_id.to_string(), watcher);
        info!("Connected to {}", device_id);

        Ok(DeviceHandle {
            id: device_id.to_string(),
            name,
        })
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError> {
        {
            let mut tasks = self.tasks();
            tasks.watchers.remove(device_id);
            tasks.notifications.retain(|(device, _), _| device != device_id);
        }
        let device = self.device(device_id)?;
        if device.is_connected().await {
            info!("Disconnecting from device {}", device_id);
            self.adapter.disconnect_device(&device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device_id);
        }
        Ok(())
    }

    async fn is_connected(&self, device_id: &str) -> Result<bool, TransportError> {
        Ok(self.device(device_id)?.is_connected().await)
    }

    async fn retrieve_capabilities(
        &self,
        device_id: &str,
    ) -> Result<Introspection, TransportError> {
        let device = self.device(device_id)?;
        let services = device.discover_services().await?;
        info!("Discovered {} services on {}", services.len(), device_id);

        let mut characteristics = Vec::new();
        for service in services {
            for characteristic in service.discover_characteristics().await? {
                let properties = match characteristic.properties().await {
                    Ok(props) => properties_of(&props),
                    Err(e) => {
                        warn!("Failed to read properties of {}: {}", characteristic.uuid(), e);
                        Vec::new()
                    }
                };
                let descriptors = match characteristic.discover_descriptors().await {
                    Ok(descriptors) => descriptors.iter().map(|d| d.uuid().to_string()).collect(),
                    Err(e) => {
                        debug!("No descriptors for {}: {}", characteristic.uuid(), e);
                        Vec::new()
                    }
                };
                characteristics.push(RawCharacteristic {
                    service: service.uuid().to_string(),
                    characteristic: characteristic.uuid().to_string(),
                    properties,
                    descriptors,
                });
            }
        }
        Ok(Introspection { characteristics })
    }

    async fn read(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let chr = self.characteristic(device_id, service, characteristic).await?;
        Ok(chr.read().await?)
    }

    async fn write(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let chr = self.characteristic(device_id, service, characteristic).await?;
        let props = chr.properties().await?;
        if props.write {
            chr.write(value).await?;
        } else {
            chr.write_without_response(value).await?;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
    ) -> Result<(), TransportError> {
        let chr = self.characteristic(device_id, service, characteristic).await?;
        let events = self.events.clone();
        let device = device_id.to_string();
        let characteristic_id = characteristic.to_lowercase();
        let (armed_tx, armed_rx) = oneshot::channel();

        let forward_characteristic = characteristic_id.clone();
        let handle = TaskHandle::spawn(&self.shutdown, move |token| async move {
            let mut stream = match chr.notify().await {
                Ok(stream) => {
                    let _ = armed_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = armed_tx.send(Err(TransportError::from(e)));
                    return;
                }
            };
            info!("Listening for notifications on {}", forward_characteristic);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(value)) => {
                            debug!("Notification from {}: {:?}", forward_characteristic, value);
                            let _ = events.send(AdapterEvent::Notification {
                                device_id: device.clone(),
                                characteristic: forward_characteristic.clone(),
                                value,
                            });
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            info!("Notification stream ended");
        });

        match armed_rx.await {
            Ok(Ok(())) => {
                self.tasks()
                    .notifications
                    .insert((device_id.to_string(), characteristic_id), handle);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Failed("notification task ended early".to_string())),
        }
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

fn properties_of(props: &bluest::CharacteristicProperties) -> Vec<Property> {
    [
        (props.broadcast, Property::Broadcast),
        (props.read, Property::Read),
        (props.write_without_response, Property::WriteWithoutResponse),
        (props.write, Property::Write),
        (props.notify, Property::Notify),
        (props.indicate, Property::Indicate),
        (props.authenticated_signed_writes, Property::AuthenticatedSignedWrites),
        (props.extended_properties, Property::ExtendedProperties),
    ]
    .into_iter()
    .filter_map(|(set, property)| set.then_some(property))
    .collect()
}

/// Last MAC-looking token of a platform device id, upper-cased.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_is_taken_from_platform_id() {
        assert_eq!(
            extract_mac_address("BluetoothLE#BluetoothLEa0:b1:c2:d3:e4:f5-11:22:33:44:55:66"),
            Some("11:22:33:44:55:66".to_string())
        );
        assert_eq!(extract_mac_address("no-address-here"), None);
    }
}
