//! Constants used throughout the application
//! This module contains all the constant values used by the link layer,
//! such as UUIDs, intervals, and other default configuration values.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid =
    Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const UUID_GENERIC_ATTRIBUTE_SERVICE: Uuid =
    Uuid::from_u128(0x00001801_0000_1000_8000_00805f9b34fb);
pub const UUID_CURRENT_TIME_SERVICE: Uuid = Uuid::from_u128(0x00001805_0000_1000_8000_00805f9b34fb);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Classic audio profile UUIDs, reported by some headsets in their service list
pub const UUID_AUDIO_SOURCE_SERVICE: Uuid = Uuid::from_u128(0x0000110a_0000_1000_8000_00805f9b34fb);
pub const UUID_AUDIO_SINK_SERVICE: Uuid = Uuid::from_u128(0x0000110b_0000_1000_8000_00805f9b34fb);
pub const UUID_HANDSFREE_SERVICE: Uuid = Uuid::from_u128(0x0000111e_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);
pub const UUID_APPEARANCE: Uuid = Uuid::from_u128(0x00002a01_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const UUID_MODEL_NUMBER: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const UUID_SERIAL_NUMBER: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);
pub const UUID_FIRMWARE_REVISION: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const UUID_HARDWARE_REVISION: Uuid = Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);
pub const UUID_MANUFACTURER_NAME: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);

/// Identifiers the Classic transport reports for its single audio capability.
/// Classic devices have no GATT table, so these are not UUIDs.
pub const CLASSIC_AUDIO_SERVICE_ID: &str = "classic-audio-service";
pub const CLASSIC_AUDIO_STREAM_ID: &str = "audio-stream";

/// Fallback names for identifiers missing from the catalog
pub const UNKNOWN_SERVICE_NAME: &str = "Unknown Service";
pub const UNKNOWN_CHARACTERISTIC_NAME: &str = "Unknown Characteristic";

/// Name fragments that mark a device as audio-capable (matched lower-case)
pub const AUDIO_KEYWORDS: &[&str] = &[
    "headphone",
    "earphone",
    "earbud",
    "airpod",
    "headset",
    "buds",
    "audio",
    "耳机",
    "音频",
];

/// Placeholder payload sent by the Write operation
pub const WRITE_PLACEHOLDER_PAYLOAD: &[u8] = b"Hello BLE";

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Interval between liveness polls while connected, in seconds
pub const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 3;

/// Interval between automatic time announcements, in seconds
pub const DEFAULT_BROADCAST_INTERVAL_SECS: u64 = 30;

/// Timeout for Bluetooth connect operations in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Capacity of the link and adapter event channels
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
