//! GATT model builder
//! Turns a transport's raw introspection output into capability records and
//! reads the standard battery and device-information services.

use log::{info, warn};

use crate::core::bluetooth::catalog::{self, CharacteristicKind, ServiceKind};
use crate::core::bluetooth::transport::TransportAdapter;
use crate::core::bluetooth::types::{
    CapabilityRecord, Introspection, PartialReadFailure, RawCharacteristic, StandardReadings,
};

/// Outcome of reading the standard services. Individual failures are
/// collected instead of aborting the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardReadReport {
    pub readings: StandardReadings,
    pub failures: Vec<PartialReadFailure>,
}

/// One capability record per raw characteristic, in reported order.
pub fn build_capabilities(introspection: &Introspection) -> Vec<CapabilityRecord> {
    introspection
        .characteristics
        .iter()
        .map(|raw| {
            let service_id = raw.service.to_ascii_lowercase();
            let characteristic_id = raw.characteristic.to_ascii_lowercase();
            CapabilityRecord {
                service_name: catalog::service_name(&service_id).to_string(),
                characteristic_name: catalog::characteristic_name(&characteristic_id).to_string(),
                role: catalog::role_of(&service_id, &characteristic_id),
                service_id,
                characteristic_id,
                properties: raw.properties.clone(),
                descriptor_count: raw.descriptors.len(),
            }
        })
        .collect()
}

/// Reads battery level and device information from the connected device.
pub async fn read_standard_services(
    adapter: &dyn TransportAdapter,
    device_id: &str,
    introspection: &Introspection,
) -> StandardReadReport {
    let mut report = StandardReadReport::default();

    let battery = introspection.characteristics.iter().find(|raw| {
        CharacteristicKind::from_id(&raw.characteristic) == Some(CharacteristicKind::BatteryLevel)
    });
    if let Some(raw) = battery {
        match read_raw(adapter, device_id, raw).await {
            Ok(data) => match data.first() {
                Some(level) => {
                    info!("Battery level: {}%", level);
                    report.readings.battery_level = Some(*level);
                }
                None => record_failure(&mut report, raw, "empty battery level payload".into()),
            },
            Err(detail) => record_failure(&mut report, raw, detail),
        }
    }

    let info_chars = introspection.characteristics.iter().filter(|raw| {
        ServiceKind::from_id(&raw.service) == Some(ServiceKind::DeviceInformation)
    });
    for raw in info_chars {
        let Some(kind) = CharacteristicKind::from_id(&raw.characteristic) else {
            continue;
        };
        match read_raw(adapter, device_id, raw).await {
            Ok(data) => {
                let value = String::from_utf8_lossy(&data)
                    .trim_end_matches('\0')
                    .to_string();
                report.readings.device_info.insert(kind, value);
            }
            Err(detail) => record_failure(&mut report, raw, detail),
        }
    }

    info!(
        "Standard services read: {} values, {} unreadable",
        report.readings.len(),
        report.failures.len()
    );
    report
}

async fn read_raw(
    adapter: &dyn TransportAdapter,
    device_id: &str,
    raw: &RawCharacteristic,
) -> Result<Vec<u8>, String> {
    adapter
        .read(device_id, &raw.service, &raw.characteristic)
        .await
        .map_err(|e| e.to_string())
}

fn record_failure(report: &mut StandardReadReport, raw: &RawCharacteristic, detail: String) {
    warn!("Could not read {}: {}", raw.characteristic, detail);
    report.failures.push(PartialReadFailure {
        characteristic_id: raw.characteristic.to_ascii_lowercase(),
        detail,
    });
}
