//! Transport adapter interface
//! Each transport family (BLE, Classic) is driven through one implementation of
//! [`TransportAdapter`]. The link layer is written once against this trait and
//! only picks the instance matching a device's family.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::types::{DeviceHandle, DeviceRecord, Introspection, TransportFamily};

/// Errors reported by a transport adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Radio is off, missing, or access was denied
    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    #[error("device not found with ID: {0}")]
    DeviceNotFound(String),

    #[error("characteristic {characteristic} not found in service {service}")]
    CharacteristicNotFound {
        service: String,
        characteristic: String,
    },

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

/// Sends `ScanStopped` at the end of a scan task, unless the task was
/// cancelled because a newer scan replaced it.
pub(crate) fn report_scan_end(events: &broadcast::Sender<AdapterEvent>, token: &CancellationToken) {
    if !token.is_cancelled() {
        let _ = events.send(AdapterEvent::ScanStopped);
    }
}

/// Events pushed by an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    StateChanged { powered: bool },
    DeviceDiscovered(DeviceRecord),
    ScanStopped,
    Connected { device_id: String },
    Disconnected { device_id: String },
    Bonded { device_id: String },
    Notification {
        device_id: String,
        characteristic: String,
        value: Vec<u8>,
    },
}

/// Capability set every transport family implements
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn family(&self) -> TransportFamily;

    /// Whether the radio is powered and usable
    async fn is_enabled(&self) -> bool;

    /// Starts a bounded scan; discovered devices arrive as
    /// [`AdapterEvent::DeviceDiscovered`] followed by [`AdapterEvent::ScanStopped`].
    async fn scan(
        &self,
        filter: &[String],
        duration: Duration,
        allow_duplicates: bool,
    ) -> Result<(), TransportError>;

    /// Devices already paired with this host
    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>, TransportError>;

    /// Runs a discovery pass and returns everything it found
    async fn discover(&self) -> Result<Vec<DeviceRecord>, TransportError>;

    async fn connect(&self, device_id: &str) -> Result<DeviceHandle, TransportError>;

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError>;

    async fn is_connected(&self, device_id: &str) -> Result<bool, TransportError>;

    async fn retrieve_capabilities(&self, device_id: &str) -> Result<Introspection, TransportError>;

    async fn read(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
    ) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Arms notifications; values are delivered on the event stream
    async fn subscribe(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
    ) -> Result<(), TransportError>;

    fn events(&self) -> broadcast::Receiver<AdapterEvent>;
}

/// One adapter per transport family
#[derive(Clone)]
pub struct Adapters {
    pub advertising: Arc<dyn TransportAdapter>,
    pub classic: Arc<dyn TransportAdapter>,
}

impl Adapters {
    pub fn new(advertising: Arc<dyn TransportAdapter>, classic: Arc<dyn TransportAdapter>) -> Self {
        Self {
            advertising,
            classic,
        }
    }

    pub fn for_family(&self, family: TransportFamily) -> &Arc<dyn TransportAdapter> {
        match family {
            TransportFamily::Advertising => &self.advertising,
            TransportFamily::Classic => &self.classic,
        }
    }
}

/// Stand-in for a family with no backend on this platform
pub struct UnsupportedTransport {
    family: TransportFamily,
    events: broadcast::Sender<AdapterEvent>,
}

impl UnsupportedTransport {
    pub fn new(family: TransportFamily) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { family, events }
    }

    fn unavailable(&self) -> TransportError {
        TransportError::Unavailable(format!("no {} backend on this platform", self.family))
    }
}

#[async_trait]
impl TransportAdapter for UnsupportedTransport {
    fn family(&self) -> TransportFamily {
        self.family
    }

    async fn is_enabled(&self) -> bool {
        false
    }

    async fn scan(&self, _: &[String], _: Duration, _: bool) -> Result<(), TransportError> {
        Err(self.unavailable())
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        Err(self.unavailable())
    }

    async fn discover(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        Err(self.unavailable())
    }

    async fn connect(&self, _: &str) -> Result<DeviceHandle, TransportError> {
        Err(self.unavailable())
    }

    async fn disconnect(&self, _: &str) -> Result<(), TransportError> {
        Err(self.unavailable())
    }

    async fn is_connected(&self, _: &str) -> Result<bool, TransportError> {
        Ok(false)
    }

    async fn retrieve_capabilities(&self, _: &str) -> Result<Introspection, TransportError> {
        Err(self.unavailable())
    }

    async fn read(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>, TransportError> {
        Err(self.unavailable())
    }

    async fn write(&self, _: &str, _: &str, _: &str, _: &[u8]) -> Result<(), TransportError> {
        Err(self.unavailable())
    }

    async fn subscribe(&self, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
        Err(self.unavailable())
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}
