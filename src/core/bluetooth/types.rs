//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::core::bluetooth::catalog::{CharacteristicKind, SemanticRole};

/// The two transport families a headset can be reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransportFamily {
    /// Energy-efficient advertising devices with a GATT table
    Advertising,
    /// Paired streaming-audio devices
    Classic,
}

impl fmt::Display for TransportFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advertising => write!(f, "BLE"),
            Self::Classic => write!(f, "Classic"),
        }
    }
}

/// Represents a discovered or paired Bluetooth device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Platform-specific identifier, unique within a transport family
    pub id: String,
    /// The name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
    /// Whether the device is paired
    pub bonded: bool,
    pub family: TransportFamily,
    /// MAC address, when it can be recovered from the identifier
    pub address: Option<String>,
}

impl DeviceRecord {
    /// Creates a new DeviceRecord instance
    pub fn new(id: impl Into<String>, name: Option<String>, family: TransportFamily) -> Self {
        Self {
            id: id.into(),
            name,
            rssi: None,
            bonded: false,
            family,
            address: None,
        }
    }

    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn bonded(mut self, bonded: bool) -> Self {
        self.bonded = bonded;
        self
    }

    pub fn with_address(mut self, address: Option<String>) -> Self {
        self.address = address;
        self
    }

    /// Name to show to a user
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }
}

/// Operations a characteristic advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Property {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
    /// Classic audio stream pseudo-property
    Audio,
}

/// One characteristic entry as reported by a transport's introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCharacteristic {
    pub service: String,
    pub characteristic: String,
    pub properties: Vec<Property>,
    pub descriptors: Vec<String>,
}

/// Raw introspection output of a connected device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Introspection {
    pub characteristics: Vec<RawCharacteristic>,
}

/// Returned by a transport after a successful connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
}

/// Normalized description of one characteristic of the connected device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityRecord {
    pub service_id: String,
    pub service_name: String,
    pub characteristic_id: String,
    pub characteristic_name: String,
    pub role: SemanticRole,
    pub properties: Vec<Property>,
    pub descriptor_count: usize,
}

impl CapabilityRecord {
    pub fn supports(&self, property: Property) -> bool {
        self.properties.contains(&property)
    }
}

/// States of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(text)
    }
}

/// Values read from the standard battery and device-information services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StandardReadings {
    /// Battery charge in percent
    pub battery_level: Option<u8>,
    pub device_info: BTreeMap<CharacteristicKind, String>,
}

impl StandardReadings {
    /// Looks a reading up by its semantic key, e.g. `battery-level` or `model`
    pub fn get(&self, key: &str) -> Option<String> {
        if key == CharacteristicKind::BatteryLevel.reading_key() {
            return self.battery_level.map(|level| level.to_string());
        }
        self.device_info
            .iter()
            .find(|(kind, _)| kind.reading_key() == key)
            .map(|(_, value)| value.clone())
    }

    pub fn len(&self) -> usize {
        self.device_info.len() + usize::from(self.battery_level.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A standard-service field that could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialReadFailure {
    pub characteristic_id: String,
    pub detail: String,
}

/// State owned for the lifetime of one connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub device: DeviceRecord,
    pub family: TransportFamily,
    pub capabilities: Vec<CapabilityRecord>,
    pub readings: StandardReadings,
    pub unreadable: Vec<PartialReadFailure>,
}

/// Read-only view of the connection handed to callers
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub device: Option<DeviceRecord>,
    pub capabilities: Vec<CapabilityRecord>,
    pub readings: StandardReadings,
    /// Number of standard-service fields that failed to read
    pub unreadable_fields: usize,
}

impl ConnectionSnapshot {
    pub fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            device: None,
            capabilities: Vec::new(),
            readings: StandardReadings::default(),
            unreadable_fields: 0,
        }
    }

    pub fn of(status: ConnectionStatus, context: Option<&ConnectionContext>) -> Self {
        match context {
            Some(context) => Self {
                status,
                device: Some(context.device.clone()),
                capabilities: context.capabilities.clone(),
                readings: context.readings.clone(),
                unreadable_fields: context.unreadable.len(),
            },
            None => Self {
                status,
                ..Self::disconnected()
            },
        }
    }
}
