//! Capability catalog
//! Immutable lookup tables that resolve service and characteristic identifiers
//! to human-readable names and semantic roles.

use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants::*;

/// What a service or characteristic is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SemanticRole {
    Battery,
    DeviceInfo,
    Audio,
    Generic,
}

/// Services known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ServiceKind {
    Battery,
    DeviceInformation,
    CurrentTime,
    GenericAccess,
    GenericAttribute,
    AudioSink,
    AudioSource,
    Handsfree,
    ClassicAudio,
}

const SERVICES: &[(Uuid, ServiceKind)] = &[
    (UUID_BATTERY_SERVICE, ServiceKind::Battery),
    (UUID_DEVICE_INFORMATION_SERVICE, ServiceKind::DeviceInformation),
    (UUID_CURRENT_TIME_SERVICE, ServiceKind::CurrentTime),
    (UUID_GENERIC_ACCESS_SERVICE, ServiceKind::GenericAccess),
    (UUID_GENERIC_ATTRIBUTE_SERVICE, ServiceKind::GenericAttribute),
    (UUID_AUDIO_SINK_SERVICE, ServiceKind::AudioSink),
    (UUID_AUDIO_SOURCE_SERVICE, ServiceKind::AudioSource),
    (UUID_HANDSFREE_SERVICE, ServiceKind::Handsfree),
];

impl ServiceKind {
    /// Resolves an identifier as reported by a transport. Case-insensitive.
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_lowercase();
        if id == CLASSIC_AUDIO_SERVICE_ID {
            return Some(Self::ClassicAudio);
        }
        let uuid = Uuid::parse_str(&id).ok()?;
        SERVICES
            .iter()
            .find(|(known, _)| *known == uuid)
            .map(|(_, kind)| *kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Battery => "Battery Service",
            Self::DeviceInformation => "Device Information",
            Self::CurrentTime => "Current Time Service",
            Self::GenericAccess => "Generic Access",
            Self::GenericAttribute => "Generic Attribute",
            Self::AudioSink => "Audio Sink",
            Self::AudioSource => "Audio Source",
            Self::Handsfree => "Handsfree",
            Self::ClassicAudio => "Classic Audio Service",
        }
    }

    pub fn role(&self) -> SemanticRole {
        match self {
            Self::Battery => SemanticRole::Battery,
            Self::DeviceInformation => SemanticRole::DeviceInfo,
            Self::AudioSink | Self::AudioSource | Self::Handsfree | Self::ClassicAudio => {
                SemanticRole::Audio
            }
            Self::CurrentTime | Self::GenericAccess | Self::GenericAttribute => {
                SemanticRole::Generic
            }
        }
    }
}

/// Characteristics known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CharacteristicKind {
    BatteryLevel,
    ManufacturerName,
    ModelNumber,
    SerialNumber,
    HardwareRevision,
    FirmwareRevision,
    DeviceName,
    Appearance,
    AudioStream,
}

const CHARACTERISTICS: &[(Uuid, CharacteristicKind)] = &[
    (UUID_BATTERY_LEVEL, CharacteristicKind::BatteryLevel),
    (UUID_MANUFACTURER_NAME, CharacteristicKind::ManufacturerName),
    (UUID_MODEL_NUMBER, CharacteristicKind::ModelNumber),
    (UUID_SERIAL_NUMBER, CharacteristicKind::SerialNumber),
    (UUID_HARDWARE_REVISION, CharacteristicKind::HardwareRevision),
    (UUID_FIRMWARE_REVISION, CharacteristicKind::FirmwareRevision),
    (UUID_DEVICE_NAME, CharacteristicKind::DeviceName),
    (UUID_APPEARANCE, CharacteristicKind::Appearance),
];

impl CharacteristicKind {
    /// Resolves an identifier as reported by a transport. Case-insensitive.
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_lowercase();
        if id == CLASSIC_AUDIO_STREAM_ID {
            return Some(Self::AudioStream);
        }
        let uuid = Uuid::parse_str(&id).ok()?;
        CHARACTERISTICS
            .iter()
            .find(|(known, _)| *known == uuid)
            .map(|(_, kind)| *kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BatteryLevel => "Battery Level",
            Self::ManufacturerName => "Manufacturer Name",
            Self::ModelNumber => "Model Number",
            Self::SerialNumber => "Serial Number",
            Self::HardwareRevision => "Hardware Revision",
            Self::FirmwareRevision => "Firmware Revision",
            Self::DeviceName => "Device Name",
            Self::Appearance => "Appearance",
            Self::AudioStream => "Audio Stream",
        }
    }

    /// Key under which a standard reading of this characteristic is stored
    pub fn reading_key(&self) -> &'static str {
        match self {
            Self::BatteryLevel => "battery-level",
            Self::ManufacturerName => "manufacturer",
            Self::ModelNumber => "model",
            Self::SerialNumber => "serial",
            Self::HardwareRevision => "hardware-rev",
            Self::FirmwareRevision => "firmware-rev",
            Self::DeviceName => "device-name",
            Self::Appearance => "appearance",
            Self::AudioStream => "audio-stream",
        }
    }

    pub fn role(&self) -> SemanticRole {
        match self {
            Self::BatteryLevel => SemanticRole::Battery,
            Self::ManufacturerName
            | Self::ModelNumber
            | Self::SerialNumber
            | Self::HardwareRevision
            | Self::FirmwareRevision => SemanticRole::DeviceInfo,
            Self::AudioStream => SemanticRole::Audio,
            Self::DeviceName | Self::Appearance => SemanticRole::Generic,
        }
    }
}

/// Role of a characteristic, taken from the characteristic itself when the
/// catalog knows it and from its service otherwise.
pub fn role_of(service_id: &str, characteristic_id: &str) -> SemanticRole {
    CharacteristicKind::from_id(characteristic_id)
        .map(|kind| kind.role())
        .or_else(|| ServiceKind::from_id(service_id).map(|kind| kind.role()))
        .unwrap_or(SemanticRole::Generic)
}

/// Name of a service identifier, or the unknown-service fallback
pub fn service_name(id: &str) -> &'static str {
    ServiceKind::from_id(id)
        .map(|kind| kind.name())
        .unwrap_or(UNKNOWN_SERVICE_NAME)
}

/// Name of a characteristic identifier, or the unknown-characteristic fallback
pub fn characteristic_name(id: &str) -> &'static str {
    CharacteristicKind::from_id(id)
        .map(|kind| kind.name())
        .unwrap_or(UNKNOWN_CHARACTERISTIC_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_lookup_ignores_case() {
        let lower = "0000180f-0000-1000-8000-00805f9b34fb";
        let upper = lower.to_uppercase();
        assert_eq!(service_name(lower), "Battery Service");
        assert_eq!(service_name(&upper), service_name(lower));
    }

    #[test]
    fn unknown_identifiers_fall_back() {
        assert_eq!(service_name("0000abcd-0000-1000-8000-00805f9b34fb"), UNKNOWN_SERVICE_NAME);
        assert_eq!(characteristic_name("not-a-uuid"), UNKNOWN_CHARACTERISTIC_NAME);
    }

    #[test]
    fn classic_audio_identifiers_resolve() {
        assert_eq!(ServiceKind::from_id(CLASSIC_AUDIO_SERVICE_ID), Some(ServiceKind::ClassicAudio));
        assert_eq!(characteristic_name(CLASSIC_AUDIO_STREAM_ID), "Audio Stream");
        assert_eq!(ServiceKind::ClassicAudio.role(), SemanticRole::Audio);
    }

    #[test]
    fn device_information_fields_have_reading_keys() {
        let kind = CharacteristicKind::from_id("00002A29-0000-1000-8000-00805F9B34FB").unwrap();
        assert_eq!(kind, CharacteristicKind::ManufacturerName);
        assert_eq!(kind.reading_key(), "manufacturer");
        assert_eq!(kind.role(), SemanticRole::DeviceInfo);
    }

    #[test]
    fn role_falls_back_to_the_service() {
        let sink = "0000110b-0000-1000-8000-00805f9b34fb";
        let vendor = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(role_of(sink, vendor), SemanticRole::Audio);
        assert_eq!(
            role_of(vendor, "00002a19-0000-1000-8000-00805f9b34fb"),
            SemanticRole::Battery
        );
        assert_eq!(role_of(vendor, vendor), SemanticRole::Generic);
    }
}
