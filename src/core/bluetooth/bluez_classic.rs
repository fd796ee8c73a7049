//! Classic Bluetooth transport over BlueZ
//! Talks to the BlueZ daemon on the system bus. Classic devices expose no
//! GATT table, so the only capability reported is the audio stream.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use zbus::fdo::ObjectManagerProxy;
use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use crate::core::bluetooth::constants::{
    CLASSIC_AUDIO_SERVICE_ID, CLASSIC_AUDIO_STREAM_ID, EVENT_CHANNEL_CAPACITY,
};
use crate::core::bluetooth::transport::{
    report_scan_end, AdapterEvent, TransportAdapter, TransportError,
};
use crate::core::bluetooth::types::{
    DeviceHandle, DeviceRecord, Introspection, Property, RawCharacteristic, TransportFamily,
};
use crate::utils::TaskHandle;

const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
const DEVICE_INTERFACE: &str = "org.bluez.Device1";

#[proxy(interface = "org.bluez.Adapter1", default_service = "org.bluez")]
trait Adapter1 {
    fn start_discovery(&self) -> zbus::Result<()>;

    fn stop_discovery(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn powered(&self) -> zbus::Result<bool>;
}

#[proxy(interface = "org.bluez.Device1", default_service = "org.bluez")]
trait Device1 {
    fn connect(&self) -> zbus::Result<()>;

    fn disconnect(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn address(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn alias(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn paired(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn connected(&self) -> zbus::Result<bool>;

    /// Only valid while discovering
    #[zbus(property, name = "RSSI")]
    fn rssi(&self) -> zbus::Result<i16>;
}

impl From<zbus::Error> for TransportError {
    fn from(e: zbus::Error) -> Self {
        TransportError::Failed(e.to_string())
    }
}

impl From<zbus::fdo::Error> for TransportError {
    fn from(e: zbus::fdo::Error) -> Self {
        match e {
            zbus::fdo::Error::ServiceUnknown(reason) => TransportError::Unavailable(reason),
            other => TransportError::Failed(other.to_string()),
        }
    }
}

/// Classic adapter driving the first BlueZ controller
pub struct BluezClassicTransport {
    conn: Connection,
    adapter_path: OwnedObjectPath,
    /// Device object paths keyed by address
    paths: Arc<Mutex<HashMap<String, OwnedObjectPath>>>,
    discovery_window: Duration,
    events: broadcast::Sender<AdapterEvent>,
    scan: Mutex<Option<TaskHandle>>,
    watchers: Mutex<HashMap<String, TaskHandle>>,
    shutdown: CancellationToken,
    _power_watcher: TaskHandle,
}

impl BluezClassicTransport {
    /// Connects to the system bus and picks the first adapter BlueZ manages.
    pub async fn new(discovery_window: Duration) -> Result<Self, TransportError> {
        let conn = Connection::system()
            .await
            .map_err(|e| TransportError::Unavailable(format!("system bus: {}", e)))?;
        let objects = object_manager(&conn).await?.get_managed_objects().await?;
        let adapter_path = objects
            .iter()
            .find(|(_, interfaces)| {
                interfaces
                    .keys()
                    .any(|name| name.as_str() == ADAPTER_INTERFACE)
            })
            .map(|(path, _)| path.clone())
            .ok_or_else(|| TransportError::Unavailable("No Bluetooth adapter found".to_string()))?;
        info!("Using BlueZ adapter {}", adapter_path.as_str());

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let adapter = adapter_proxy(&conn, &adapter_path).await?;
        let power_watcher = spawn_power_watcher(adapter, events.clone(), &shutdown);

        Ok(Self {
            conn,
            adapter_path,
            paths: Arc::new(Mutex::new(HashMap::new())),
            discovery_window,
            events,
            scan: Mutex::new(None),
            watchers: Mutex::new(HashMap::new()),
            shutdown,
            _power_watcher: power_watcher,
        })
    }

    fn paths(&self) -> MutexGuard<'_, HashMap<String, OwnedObjectPath>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn adapter(&self) -> Result<Adapter1Proxy<'static>, TransportError> {
        adapter_proxy(&self.conn, &self.adapter_path).await
    }

    async fn device(&self, address: &str) -> Result<Device1Proxy<'static>, TransportError> {
        let known = self.paths().get(address).cloned();
        let path = match known {
            Some(path) => path,
            None => {
                list_devices(&self.conn, &self.paths).await?;
                self.paths()
                    .get(address)
                    .cloned()
                    .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?
            }
        };
        device_proxy(&self.conn, &path).await
    }

    /// Runs discovery for the configured window and lists what BlueZ knows.
    async fn discovery_pass(
        conn: &Connection,
        adapter: &Adapter1Proxy<'static>,
        paths: &Mutex<HashMap<String, OwnedObjectPath>>,
        window: Duration,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<DeviceRecord>, TransportError> {
        adapter.start_discovery().await?;
        info!("Classic discovery started");
        tokio::select! {
            _ = cancel_token.cancelled() => {}
            _ = tokio::time::sleep(window) => {}
        }
        if let Err(e) = adapter.stop_discovery().await {
            debug!("Failed to stop discovery: {}", e);
        }
        list_devices(conn, paths).await
    }

    fn spawn_link_watcher(&self, address: String, device: Device1Proxy<'static>) -> TaskHandle {
        let events = self.events.clone();
        TaskHandle::spawn(&self.shutdown, move |token| async move {
            let mut connected = device.receive_connected_changed().await;
            let mut paired = device.receive_paired_changed().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = connected.next() => {
                        let Some(change) = change else { break };
                        let device_id = address.clone();
                        match change.get().await {
                            Ok(true) => {
                                let _ = events.send(AdapterEvent::Connected { device_id });
                            }
                            Ok(false) => {
                                let _ = events.send(AdapterEvent::Disconnected { device_id });
                            }
                            Err(e) => {
                                warn!("Failed to read connection state of {}: {}", address, e)
                            }
                        }
                    }
                    change = paired.next() => {
                        let Some(change) = change else { break };
                        if let Ok(true) = change.get().await {
                            let device_id = address.clone();
                            let _ = events.send(AdapterEvent::Bonded { device_id });
                        }
                    }
                }
            }
        })
    }
}

impl Drop for BluezClassicTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl TransportAdapter for BluezClassicTransport {
    fn family(&self) -> TransportFamily {
        TransportFamily::Classic
    }

    async fn is_enabled(&self) -> bool {
        match self.adapter().await {
            Ok(adapter) => adapter.powered().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn scan(
        &self,
        _: &[String],
        duration: Duration,
        allow_duplicates: bool,
    ) -> Result<(), TransportError> {
        if !self.is_enabled().await {
            return Err(TransportError::Unavailable("Bluetooth is turned off".to_string()));
        }
        let adapter = self.adapter().await?;
        let conn = self.conn.clone();
        let paths = self.paths.clone();
        let events = self.events.clone();
        let handle = TaskHandle::spawn(&self.shutdown, move |token| async move {
            match Self::discovery_pass(&conn, &adapter, &paths, duration, &token).await {
                Ok(devices) => {
                    let mut seen = HashSet::new();
                    for device in devices {
                        if allow_duplicates || seen.insert(device.id.clone()) {
                            let _ = events.send(AdapterEvent::DeviceDiscovered(device));
                        }
                    }
                }
                Err(e) => error!("Classic discovery failed: {}", e),
            }
            report_scan_end(&events, &token);
        });
        *self.scan.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        let devices = list_devices(&self.conn, &self.paths).await?;
        Ok(devices.into_iter().filter(|device| device.bonded).collect())
    }

    async fn discover(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        let adapter = self.adapter().await?;
        let devices = Self::discovery_pass(
            &self.conn,
            &adapter,
            &self.paths,
            self.discovery_window,
            &self.shutdown,
        )
        .await?;
        Ok(devices.into_iter().filter(|device| !device.bonded).collect())
    }

    async fn connect(&self, device_id: &str) -> Result<DeviceHandle, TransportError> {
        let device = self.device(device_id).await?;
        if !device.connected().await.unwrap_or(false) {
            info!("Initiating Classic connection to {}...", device_id);
            device.connect().await?;
        }
        let name = device.alias().await.ok();
        let watcher = self.spawn_link_watcher(device_id.to_string(), device);
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(device_id.to_string(), watcher);
        Ok(DeviceHandle {
            id: device_id.to_string(),
            name,
        })
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError> {
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(device_id);
        let device = self.device(device_id).await?;
        if device.connected().await.unwrap_or(false) {
            info!("Disconnecting Classic device {}", device_id);
            device.disconnect().await?;
        }
        Ok(())
    }

    async fn is_connected(&self, device_id: &str) -> Result<bool, TransportError> {
        Ok(self.device(device_id).await?.connected().await?)
    }

    async fn retrieve_capabilities(&self, _: &str) -> Result<Introspection, TransportError> {
        Ok(Introspection {
            characteristics: vec![RawCharacteristic {
                service: CLASSIC_AUDIO_SERVICE_ID.to_string(),
                characteristic: CLASSIC_AUDIO_STREAM_ID.to_string(),
                properties: vec![Property::Audio],
                descriptors: Vec::new(),
            }],
        })
    }

    async fn read(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Unsupported(
            "Classic devices have no readable characteristics".to_string(),
        ))
    }

    async fn write(&self, _: &str, _: &str, _: &str, _: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            "Classic devices have no writable characteristics".to_string(),
        ))
    }

    async fn subscribe(&self, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("Classic devices have no notifications".to_string()))
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

async fn object_manager(conn: &Connection) -> Result<ObjectManagerProxy<'static>, TransportError> {
    Ok(ObjectManagerProxy::builder(conn)
        .destination("org.bluez")?
        .path("/")?
        .build()
        .await?)
}

async fn adapter_proxy(
    conn: &Connection,
    path: &OwnedObjectPath,
) -> Result<Adapter1Proxy<'static>, TransportError> {
    Ok(Adapter1Proxy::builder(conn)
        .path(path.clone())?
        .build()
        .await?)
}

async fn device_proxy(
    conn: &Connection,
    path: &OwnedObjectPath,
) -> Result<Device1Proxy<'static>, TransportError> {
    Ok(Device1Proxy::builder(conn)
        .path(path.clone())?
        .build()
        .await?)
}

/// Every device object BlueZ currently knows, refreshing the address map.
async fn list_devices(
    conn: &Connection,
    paths: &Mutex<HashMap<String, OwnedObjectPath>>,
) -> Result<Vec<DeviceRecord>, TransportError> {
    let objects = object_manager(conn).await?.get_managed_objects().await?;
    let mut records = Vec::new();
    for (path, interfaces) in objects {
        if !interfaces.keys().any(|name| name.as_str() == DEVICE_INTERFACE) {
            continue;
        }
        let device = device_proxy(conn, &path).await?;
        let address = match device.address().await {
            Ok(address) => address,
            Err(e) => {
                debug!("Skipping {}: {}", path.as_str(), e);
                continue;
            }
        };
        let name = device.alias().await.ok();
        let record = DeviceRecord::new(address.clone(), name, TransportFamily::Classic)
            .with_rssi(device.rssi().await.ok())
            .bonded(device.paired().await.unwrap_or(false))
            .with_address(Some(address.clone()));
        paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address, path);
        records.push(record);
    }
    Ok(records)
}

fn spawn_power_watcher(
    adapter: Adapter1Proxy<'static>,
    events: broadcast::Sender<AdapterEvent>,
    shutdown: &CancellationToken,
) -> TaskHandle {
    TaskHandle::spawn(shutdown, move |token| async move {
        let mut changes = adapter.receive_powered_changed().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                change = changes.next() => {
                    let Some(change) = change else { break };
                    if let Ok(powered) = change.get().await {
                        let _ = events.send(AdapterEvent::StateChanged { powered });
                    }
                }
            }
        }
    })
}
