//! Capability invocation
//! Executes read, write and notify operations against one characteristic of
//! the connected device.

use std::fmt;

use log::{debug, error, info};
use serde::Serialize;

use crate::core::bluetooth::constants::WRITE_PLACEHOLDER_PAYLOAD;
use crate::core::bluetooth::transport::TransportAdapter;
use crate::core::bluetooth::types::{CapabilityRecord, Property};
use crate::error::LinkError;
use crate::utils::to_hex;

/// Operations a caller can run against a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    Read,
    Write,
    Notify,
}

impl Operation {
    /// Characteristic properties that allow this operation
    fn required_properties(&self) -> &'static [Property] {
        match self {
            Self::Read => &[Property::Read],
            Self::Write => &[Property::Write, Property::WriteWithoutResponse],
            Self::Notify => &[Property::Notify, Property::Indicate],
        }
    }

    pub fn is_supported_by(&self, capability: &CapabilityRecord) -> bool {
        self.required_properties()
            .iter()
            .any(|property| capability.supports(*property))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "Read"),
            Self::Write => write!(f, "Write"),
            Self::Notify => write!(f, "Notify"),
        }
    }
}

/// Bytes returned by a read, with their hex rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadValue {
    pub bytes: Vec<u8>,
    pub hex: String,
}

impl ReadValue {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hex = to_hex(&bytes);
        Self { bytes, hex }
    }
}

/// Result of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InvocationOutcome {
    Read(ReadValue),
    Written,
    NotifyArmed,
}

/// Runs `operation` against `capability` on the given device.
///
/// The caller is responsible for checking that the device is connected.
pub async fn invoke(
    adapter: &dyn TransportAdapter,
    device_id: &str,
    capability: &CapabilityRecord,
    operation: Operation,
) -> Result<InvocationOutcome, LinkError> {
    if !operation.is_supported_by(capability) {
        return Err(LinkError::OperationFailed {
            operation,
            detail: format!(
                "{} does not support {}",
                capability.characteristic_name, operation
            ),
        });
    }

    let service = capability.service_id.as_str();
    let characteristic = capability.characteristic_id.as_str();
    debug!("Invoking {} on {} / {}", operation, service, characteristic);

    let result = match operation {
        Operation::Read => adapter
            .read(device_id, service, characteristic)
            .await
            .map(|bytes| InvocationOutcome::Read(ReadValue::new(bytes))),
        Operation::Write => adapter
            .write(device_id, service, characteristic, WRITE_PLACEHOLDER_PAYLOAD)
            .await
            .map(|_| InvocationOutcome::Written),
        Operation::Notify => adapter
            .subscribe(device_id, service, characteristic)
            .await
            .map(|_| InvocationOutcome::NotifyArmed),
    };

    match result {
        Ok(outcome) => {
            if let InvocationOutcome::Read(value) = &outcome {
                info!("Read {} bytes from {}: {}", value.bytes.len(), characteristic, value.hex);
            } else {
                info!("{} on {} succeeded", operation, characteristic);
            }
            Ok(outcome)
        }
        Err(e) => {
            error!("{} on {} failed: {}", operation, characteristic, e);
            Err(LinkError::OperationFailed {
                operation,
                detail: e.to_string(),
            })
        }
    }
}
