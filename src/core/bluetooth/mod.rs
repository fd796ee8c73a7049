//! Bluetooth functionality for the headset link
//! This module handles discovery over both transport families, the single
//! active connection, GATT introspection and characteristic invocation.

pub mod catalog;
pub mod connection;
pub mod constants;
pub mod events;
pub mod gatt;
pub mod invocation;
pub mod manager;
pub mod scanner;
pub mod transport;
pub mod types;

mod bluest_transport;
#[cfg(target_os = "linux")]
mod bluez_classic;

// Re-export types that should be publicly accessible
pub use bluest_transport::{extract_mac_address, BluestTransport};
#[cfg(target_os = "linux")]
pub use bluez_classic::BluezClassicTransport;
pub use catalog::{CharacteristicKind, SemanticRole, ServiceKind};
pub use connection::{ConnectionManager, ConnectionSettings};
pub use constants::*; // Re-export all constants
pub use events::{LinkEvent, Subscription};
pub use invocation::{InvocationOutcome, Operation, ReadValue};
pub use manager::BluetoothManager;
pub use scanner::BluetoothScanner;
pub use transport::{AdapterEvent, Adapters, TransportAdapter, TransportError, UnsupportedTransport};
pub use types::{
    CapabilityRecord, ConnectionSnapshot, ConnectionStatus, DeviceHandle, DeviceRecord,
    Introspection, PartialReadFailure, Property, RawCharacteristic, StandardReadings,
    TransportFamily,
};
