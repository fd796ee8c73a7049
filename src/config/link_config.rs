use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    BLUETOOTH_OPERATION_TIMEOUT_SECS, DEFAULT_BROADCAST_INTERVAL_SECS,
    DEFAULT_LIVENESS_INTERVAL_SECS, DEFAULT_SCAN_DURATION_SECS,
};
use crate::core::bluetooth::ConnectionSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// How long a BLE scan runs before the adapter stops it.
    pub scan_duration_secs: u64,

    /// Interval between "still connected?" polls while a device is connected.
    pub liveness_interval_secs: u64,

    /// Interval between periodic time announcements.
    pub broadcast_interval_secs: u64,

    /// Upper bound for a connect attempt. `null` leaves it to the adapter.
    pub operation_timeout_secs: Option<u64>,

    /// Start periodic announcements as soon as the manager is created.
    pub auto_broadcast: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
            liveness_interval_secs: DEFAULT_LIVENESS_INTERVAL_SECS,
            broadcast_interval_secs: DEFAULT_BROADCAST_INTERVAL_SECS,
            operation_timeout_secs: Some(BLUETOOTH_OPERATION_TIMEOUT_SECS),
            auto_broadcast: false,
        }
    }
}

impl LinkConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs.max(1))
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            liveness_interval: Duration::from_secs(self.liveness_interval_secs.max(1)),
            operation_timeout: self.operation_timeout_secs.map(Duration::from_secs),
        }
    }
}
