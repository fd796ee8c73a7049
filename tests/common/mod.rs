//! Mock implementations for the transport adapters and speech output
//!
//! Lets the link manager run end to end without Bluetooth hardware.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use headset_link_lib::config::AppConfig;
use headset_link_lib::core::bluetooth::{
    AdapterEvent, Adapters, BluetoothManager, DeviceHandle, DeviceRecord, Introspection,
    LinkEvent, Property, RawCharacteristic, Subscription, TransportAdapter, TransportError,
    TransportFamily,
};
use headset_link_lib::core::{SpeechError, SpeechSink};

pub const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
pub const BATTERY_LEVEL: &str = "00002a19-0000-1000-8000-00805f9b34fb";
pub const DEVICE_INFO_SERVICE: &str = "0000180a-0000-1000-8000-00805f9b34fb";
pub const MANUFACTURER_NAME: &str = "00002a29-0000-1000-8000-00805f9b34fb";
pub const MODEL_NUMBER: &str = "00002a24-0000-1000-8000-00805f9b34fb";
pub const SERIAL_NUMBER: &str = "00002a25-0000-1000-8000-00805f9b34fb";
pub const VENDOR_SERVICE: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
pub const VENDOR_WRITE: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// Behavior configuration for the mock adapter
#[derive(Debug, Default)]
pub struct MockBehavior {
    pub fail_connect: Option<String>,
    /// Time the connect call takes before answering
    pub connect_delay: Option<Duration>,
    /// Reading any characteristic reports the device as disconnected
    pub disconnect_event_on_read: bool,
    /// Reading any characteristic silently drops the link
    pub link_down_on_read: bool,
    pub fail_disconnect: bool,
    /// Devices emitted by the next scan, in order
    pub scan_results: Vec<DeviceRecord>,
    pub bonded: Vec<DeviceRecord>,
    pub discovered: Vec<DeviceRecord>,
    pub introspection: Introspection,
    /// Read results keyed by lower-case characteristic id
    pub reads: HashMap<String, Result<Vec<u8>, TransportError>>,
}

/// Mock implementation of a transport adapter
pub struct MockTransport {
    family: TransportFamily,
    pub enabled: AtomicBool,
    /// Answer given to liveness polls
    pub link_up: AtomicBool,
    pub behavior: Mutex<MockBehavior>,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub polls: AtomicUsize,
    pub read_calls: Mutex<Vec<String>>,
    pub write_calls: Mutex<Vec<(String, Vec<u8>)>>,
    pub subscribe_calls: Mutex<Vec<String>>,
    events: broadcast::Sender<AdapterEvent>,
}

impl MockTransport {
    pub fn new(family: TransportFamily) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            family,
            enabled: AtomicBool::new(true),
            link_up: AtomicBool::new(true),
            behavior: Mutex::new(MockBehavior::default()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            read_calls: Mutex::new(Vec::new()),
            write_calls: Mutex::new(Vec::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn behave(&self, configure: impl FnOnce(&mut MockBehavior)) {
        configure(&mut self.behavior.lock().unwrap());
    }

    /// Pushes an event as if the platform reported it
    pub fn push(&self, event: AdapterEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> Vec<String> {
        self.read_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    fn family(&self) -> TransportFamily {
        self.family
    }

    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn scan(&self, _: &[String], _: Duration, _: bool) -> Result<(), TransportError> {
        let results = self.behavior.lock().unwrap().scan_results.clone();
        for record in results {
            self.push(AdapterEvent::DeviceDiscovered(record));
        }
        self.push(AdapterEvent::ScanStopped);
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        Ok(self.behavior.lock().unwrap().bonded.clone())
    }

    async fn discover(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        Ok(self.behavior.lock().unwrap().discovered.clone())
    }

    async fn connect(&self, device_id: &str) -> Result<DeviceHandle, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.behavior.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.behavior.lock().unwrap().fail_connect.clone() {
            return Err(TransportError::Failed(reason));
        }
        self.set_link_up(true);
        Ok(DeviceHandle {
            id: device_id.to_string(),
            name: None,
        })
    }

    async fn disconnect(&self, _: &str) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.set_link_up(false);
        if self.behavior.lock().unwrap().fail_disconnect {
            return Err(TransportError::Failed("link busy".to_string()));
        }
        Ok(())
    }

    async fn is_connected(&self, _: &str) -> Result<bool, TransportError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.link_up.load(Ordering::SeqCst))
    }

    async fn retrieve_capabilities(&self, _: &str) -> Result<Introspection, TransportError> {
        Ok(self.behavior.lock().unwrap().introspection.clone())
    }

    async fn read(
        &self,
        device_id: &str,
        _: &str,
        characteristic: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let characteristic = characteristic.to_ascii_lowercase();
        self.read_calls.lock().unwrap().push(characteristic.clone());
        let (disconnect_event, link_down) = {
            let behavior = self.behavior.lock().unwrap();
            (behavior.disconnect_event_on_read, behavior.link_down_on_read)
        };
        if link_down {
            self.set_link_up(false);
        }
        if disconnect_event {
            self.push(AdapterEvent::Disconnected {
                device_id: device_id.to_string(),
            });
            // Let the manager's event pump see it before the read returns.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.behavior
            .lock()
            .unwrap()
            .reads
            .get(&characteristic)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::Failed("no value".to_string())))
    }

    async fn write(
        &self,
        _: &str,
        _: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.write_calls
            .lock()
            .unwrap()
            .push((characteristic.to_string(), value.to_vec()));
        Ok(())
    }

    async fn subscribe(
        &self,
        _: &str,
        _: &str,
        characteristic: &str,
    ) -> Result<(), TransportError> {
        self.subscribe_calls
            .lock()
            .unwrap()
            .push(characteristic.to_string());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

/// Speech output that records every utterance
#[derive(Default)]
pub struct RecordingSpeech {
    pub spoken: Mutex<Vec<String>>,
}

impl RecordingSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSink for RecordingSpeech {
    async fn configure(&self, _: &str, _: f32, _: f32) -> Result<(), SpeechError> {
        Ok(())
    }

    async fn speak(&self, utterance: &str) -> Result<(), SpeechError> {
        self.spoken.lock().unwrap().push(utterance.to_string());
        Ok(())
    }
}

pub struct TestRig {
    pub manager: BluetoothManager,
    pub ble: Arc<MockTransport>,
    pub classic: Arc<MockTransport>,
    pub speech: Arc<RecordingSpeech>,
}

pub async fn rig() -> TestRig {
    rig_with(AppConfig::default()).await
}

pub async fn rig_with(config: AppConfig) -> TestRig {
    let ble = MockTransport::new(TransportFamily::Advertising);
    let classic = MockTransport::new(TransportFamily::Classic);
    let speech = Arc::new(RecordingSpeech::default());
    let adapters = Adapters::new(ble.clone(), classic.clone());
    let manager = BluetoothManager::new(adapters, &config, speech.clone()).await;
    TestRig {
        manager,
        ble,
        classic,
        speech,
    }
}

pub fn device(id: &str, name: &str, family: TransportFamily) -> DeviceRecord {
    DeviceRecord::new(id, Some(name.to_string()), family)
}

pub fn characteristic(
    service: &str,
    characteristic: &str,
    properties: &[Property],
) -> RawCharacteristic {
    RawCharacteristic {
        service: service.to_string(),
        characteristic: characteristic.to_string(),
        properties: properties.to_vec(),
        descriptors: Vec::new(),
    }
}

/// Headset exposing battery, device information and a vendor write characteristic
pub fn headset_introspection() -> Introspection {
    Introspection {
        characteristics: vec![
            characteristic(BATTERY_SERVICE, BATTERY_LEVEL, &[Property::Read, Property::Notify]),
            characteristic(DEVICE_INFO_SERVICE, MANUFACTURER_NAME, &[Property::Read]),
            characteristic(DEVICE_INFO_SERVICE, MODEL_NUMBER, &[Property::Read]),
            characteristic(DEVICE_INFO_SERVICE, SERIAL_NUMBER, &[Property::Read]),
            characteristic(VENDOR_SERVICE, VENDOR_WRITE, &[Property::WriteWithoutResponse]),
        ],
    }
}

/// Waits (in virtual time) for the first event matching `predicate`.
pub async fn wait_for(
    events: &mut Subscription,
    predicate: impl Fn(&LinkEvent) -> bool,
) -> Option<LinkEvent> {
    let search = async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(60), search)
        .await
        .ok()
        .flatten()
}
