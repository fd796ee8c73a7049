//! Headset link library
//! Connection manager for a single wireless headset reached over BLE (GATT)
//! or Classic Bluetooth.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod utils;

pub use crate::config::AppConfig;
pub use crate::core::bluetooth::{
    Adapters, BluetoothManager, ConnectionSnapshot, ConnectionStatus, DeviceRecord, LinkEvent,
    Operation, TransportFamily,
};
pub use crate::error::{LinkError, Notice};
