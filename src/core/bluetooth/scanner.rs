//! Device discovery and ranking
//! Accumulates scanned and paired devices per transport family and orders
//! them with audio devices first.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};

use crate::core::bluetooth::constants::AUDIO_KEYWORDS;
use crate::core::bluetooth::transport::{Adapters, TransportError};
use crate::core::bluetooth::types::{DeviceRecord, TransportFamily};
use crate::error::LinkError;

#[derive(Default)]
struct DiscoveryResults {
    advertising: Vec<DeviceRecord>,
    classic: Vec<DeviceRecord>,
    scanning: HashSet<TransportFamily>,
}

impl DiscoveryResults {
    fn devices_mut(&mut self, family: TransportFamily) -> &mut Vec<DeviceRecord> {
        match family {
            TransportFamily::Advertising => &mut self.advertising,
            TransportFamily::Classic => &mut self.classic,
        }
    }

    fn devices(&self, family: TransportFamily) -> &[DeviceRecord] {
        match family {
            TransportFamily::Advertising => &self.advertising,
            TransportFamily::Classic => &self.classic,
        }
    }
}

/// Discovery state for both transport families
#[derive(Clone)]
pub struct BluetoothScanner {
    adapters: Adapters,
    results: Arc<Mutex<DiscoveryResults>>,
    scan_duration: Duration,
}

impl BluetoothScanner {
    pub fn new(adapters: Adapters, scan_duration: Duration) -> Self {
        Self {
            adapters,
            results: Arc::new(Mutex::new(DiscoveryResults::default())),
            scan_duration,
        }
    }

    fn results(&self) -> MutexGuard<'_, DiscoveryResults> {
        // A panic while holding the lock cannot leave the lists half-written.
        self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clears the family's results and starts a bounded adapter scan.
    pub async fn start_scan(&self, family: TransportFamily) -> Result<(), LinkError> {
        let adapter = self.adapters.for_family(family);
        self.results().devices_mut(family).clear();

        if !adapter.is_enabled().await {
            warn!("{} radio is off, scan not started", family);
            return Err(LinkError::AdapterUnavailable {
                family,
                reason: "Bluetooth is turned off".to_string(),
            });
        }

        self.results().scanning.insert(family);
        if let Err(e) = adapter.scan(&[], self.scan_duration, false).await {
            self.results().scanning.remove(&family);
            return Err(scan_error(family, e));
        }
        info!(
            "{} scan started for {} seconds",
            family,
            self.scan_duration.as_secs()
        );
        Ok(())
    }

    /// Upserts an observation; a later sighting replaces the earlier one.
    pub fn on_device_observed(&self, record: DeviceRecord) {
        debug!(
            "Found device - ID: {}, Name: {:?}, RSSI: {:?}",
            record.id, record.name, record.rssi
        );
        let mut results = self.results();
        let devices = results.devices_mut(record.family);
        match devices.iter_mut().find(|known| known.id == record.id) {
            Some(known) => *known = record,
            None => devices.push(record),
        }
    }

    /// Marks a family's scan as finished.
    pub fn finish_scan(&self, family: TransportFamily) {
        if self.results().scanning.remove(&family) {
            info!("{} scan complete", family);
        }
    }

    pub fn is_scanning(&self, family: TransportFamily) -> bool {
        self.results().scanning.contains(&family)
    }

    /// Merges paired and freshly discovered Classic devices, paired entries
    /// winning on identifier collisions. Replaces the Classic result set.
    pub async fn collect_classic_devices(&self) -> Result<Vec<DeviceRecord>, LinkError> {
        let family = TransportFamily::Classic;
        let adapter = self.adapters.for_family(family).clone();
        self.results().scanning.insert(family);

        let result = async {
            let paired = adapter
                .bonded_devices()
                .await
                .map_err(|e| scan_error(family, e))?;
            info!("Paired Classic devices: {}", paired.len());

            if !adapter.is_enabled().await {
                return Err(LinkError::AdapterUnavailable {
                    family,
                    reason: "Bluetooth is turned off".to_string(),
                });
            }

            let discovered = adapter.discover().await.map_err(|e| scan_error(family, e))?;
            info!("Discovered Classic devices: {}", discovered.len());
            Ok(merge_first_wins(paired, discovered))
        }
        .await;

        let mut results = self.results();
        results.scanning.remove(&family);
        let devices = result?;
        info!("Classic devices in total: {}", devices.len());
        results.classic = devices.clone();
        Ok(devices)
    }

    /// Re-reads the paired list after a bond completes.
    pub async fn refresh_bonded(&self) -> Result<(), LinkError> {
        let family = TransportFamily::Classic;
        let paired = self
            .adapters
            .for_family(family)
            .bonded_devices()
            .await
            .map_err(|e| scan_error(family, e))?;
        let mut results = self.results();
        let known = std::mem::take(&mut results.classic);
        results.classic = merge_first_wins(paired, known);
        Ok(())
    }

    /// Devices of one family in discovery order
    pub fn devices(&self, family: TransportFamily) -> Vec<DeviceRecord> {
        self.results().devices(family).to_vec()
    }

    /// Devices of one family, audio devices first
    pub fn ranked_devices(&self, family: TransportFamily) -> Vec<DeviceRecord> {
        rank(self.devices(family))
    }
}

fn scan_error(family: TransportFamily, error: TransportError) -> LinkError {
    match error {
        TransportError::Unavailable(reason) => LinkError::AdapterUnavailable { family, reason },
        other => LinkError::ScanFailed {
            family,
            detail: other.to_string(),
        },
    }
}

/// Concatenates both lists and drops later duplicates by identifier.
fn merge_first_wins(first: Vec<DeviceRecord>, second: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(second)
        .filter(|device| seen.insert(device.id.clone()))
        .collect()
}

/// Whether the device name suggests a headset or other audio device
pub fn is_audio_device(device: &DeviceRecord) -> bool {
    let name = device.name.as_deref().unwrap_or_default().to_lowercase();
    AUDIO_KEYWORDS.iter().any(|keyword| name.contains(keyword))
}

/// Stable partition: audio devices first, discovery order kept within each group.
pub fn rank(mut devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    devices.sort_by_key(|device| !is_audio_device(device));
    devices
}
