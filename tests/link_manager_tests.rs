//! End-to-end tests of the link manager against mock transports

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::*;
use headset_link_lib::config::AppConfig;
use headset_link_lib::core::announcer::AUTO_ANNOUNCEMENT_PREFIX;
use headset_link_lib::core::bluetooth::{
    AdapterEvent, ConnectionStatus, InvocationOutcome, LinkEvent, Operation, TransportError,
    TransportFamily,
};
use headset_link_lib::error::{NoticeAction, NoticeKind};
use headset_link_lib::LinkError;

const BLE: TransportFamily = TransportFamily::Advertising;

async fn connected_rig() -> TestRig {
    let rig = rig().await;
    rig.ble.behave(|b| {
        b.introspection = headset_introspection();
        b.reads.insert(BATTERY_LEVEL.into(), Ok(vec![78]));
        b.reads.insert(MANUFACTURER_NAME.into(), Ok(b"Acme\0".to_vec()));
        b.reads.insert(MODEL_NUMBER.into(), Ok(b"H-100".to_vec()));
    });
    rig.manager
        .connect(&device("AA:01", "Acme Headset", BLE))
        .await
        .unwrap();
    rig
}

#[tokio::test(start_paused = true)]
async fn connect_publishes_capabilities_and_standard_readings() {
    let rig = connected_rig().await;

    let snapshot = rig.manager.snapshot().await;

    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.capabilities.len(), 5);
    assert_eq!(snapshot.capabilities[0].service_name, "Battery Service");
    assert_eq!(snapshot.capabilities[0].characteristic_name, "Battery Level");
    assert_eq!(snapshot.readings.battery_level, Some(78));
    assert_eq!(snapshot.readings.get("battery-level").as_deref(), Some("78"));
    assert_eq!(snapshot.readings.get("manufacturer").as_deref(), Some("Acme"));
    assert_eq!(snapshot.readings.get("model").as_deref(), Some("H-100"));
    // Serial number has no value in the mock.
    assert_eq!(snapshot.readings.get("serial"), None);
    assert_eq!(snapshot.unreadable_fields, 1);
}

#[tokio::test(start_paused = true)]
async fn connected_event_follows_status_change() {
    let rig = rig().await;
    let mut events = rig.manager.subscribe();
    rig.ble.behave(|b| b.introspection = headset_introspection());

    rig.manager
        .connect(&device("AA:01", "Acme Headset", BLE))
        .await
        .unwrap();

    let statuses: Vec<LinkEvent> = events.drain();
    let kinds: Vec<String> = statuses
        .iter()
        .map(|event| match event {
            LinkEvent::StatusChanged(status) => status.to_string(),
            LinkEvent::Connected(_) => "connected-event".to_string(),
            other => format!("{:?}", other),
        })
        .collect();
    assert_eq!(kinds, vec!["connecting", "connected", "connected-event"]);
}

#[tokio::test(start_paused = true)]
async fn upper_case_identifiers_resolve_to_standard_names() {
    let rig = rig().await;
    rig.ble.behave(|b| {
        b.introspection.characteristics = vec![characteristic(
            &BATTERY_SERVICE.to_uppercase(),
            &BATTERY_LEVEL.to_uppercase(),
            &[headset_link_lib::core::bluetooth::Property::Read],
        )];
        b.reads.insert(BATTERY_LEVEL.into(), Ok(vec![42, 0]));
    });

    let snapshot = rig
        .manager
        .connect(&device("AA:02", "Buds", BLE))
        .await
        .unwrap();

    assert_eq!(snapshot.capabilities[0].service_name, "Battery Service");
    assert_eq!(snapshot.capabilities[0].characteristic_id, BATTERY_LEVEL);
    assert_eq!(snapshot.readings.battery_level, Some(42));
}

#[tokio::test(start_paused = true)]
async fn second_connect_is_a_conflict() {
    let rig = connected_rig().await;

    let result = rig.manager.connect(&device("BB:02", "Other", BLE)).await;

    assert_eq!(result.unwrap_err(), LinkError::Conflict(ConnectionStatus::Connected));
    assert_eq!(rig.ble.connect_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        rig.manager.snapshot().await.device.map(|d| d.id),
        Some("AA:01".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn failed_connect_returns_to_disconnected() {
    let rig = rig().await;
    rig.ble.behave(|b| b.fail_connect = Some("refused".to_string()));

    let result = rig.manager.connect(&device("AA:01", "Acme", BLE)).await;

    assert!(matches!(
        result,
        Err(LinkError::ConnectFailed { ref detail, .. }) if detail == "refused"
    ));
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
    assert_eq!(rig.manager.last_device().await, None);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connecting_is_a_conflict() {
    let rig = rig().await;
    rig.ble.behave(|b| b.connect_delay = Some(Duration::from_secs(5)));
    let headset = device("AA:01", "Acme", BLE);
    let other = device("BB:02", "Other", BLE);

    let (first, second) = tokio::join!(rig.manager.connect(&headset), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        rig.manager.connect(&other).await
    });

    assert_eq!(
        second.unwrap_err(),
        LinkError::Conflict(ConnectionStatus::Connecting)
    );
    assert_eq!(first.unwrap().device.map(|d| d.id), Some("AA:01".to_string()));
    assert_eq!(rig.ble.connect_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_is_a_connect_failure() {
    let rig = rig().await;
    rig.ble.behave(|b| b.connect_delay = Some(Duration::from_secs(20)));

    let result = rig.manager.connect(&device("AA:01", "Acme", BLE)).await;

    assert_eq!(
        result.unwrap_err(),
        LinkError::ConnectFailed {
            device_id: "AA:01".to_string(),
            detail: "timed out after 10 seconds".to_string(),
        }
    );
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
    // The abandoned platform connect is cancelled.
    assert_eq!(rig.ble.disconnect_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_reported_during_setup_fails_the_connect() {
    let rig = rig().await;
    let mut events = rig.manager.subscribe();
    rig.ble.behave(|b| {
        b.introspection = headset_introspection();
        b.disconnect_event_on_read = true;
    });

    let result = rig.manager.connect(&device("AA:01", "Acme", BLE)).await;

    assert_eq!(
        result.unwrap_err(),
        LinkError::ConnectFailed {
            device_id: "AA:01".to_string(),
            detail: "device disconnected during setup".to_string(),
        }
    );
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
    assert!(rig.manager.snapshot().await.capabilities.is_empty());
    let seen = events.drain();
    assert!(!seen.iter().any(|e| matches!(e, LinkEvent::Connected(_))));
}

#[tokio::test(start_paused = true)]
async fn link_lost_during_setup_fails_the_reconnect() {
    let rig = connected_rig().await;
    rig.manager.disconnect().await.unwrap();
    rig.ble.behave(|b| b.link_down_on_read = true);

    let result = rig.manager.reconnect().await;

    assert!(matches!(result, Err(LinkError::ReconnectFailed { .. })));
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
    // A later poll period must not find a monitor running.
    let polls = rig.ble.polls();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.ble.polls(), polls);
}

#[tokio::test(start_paused = true)]
async fn liveness_poll_detects_a_dropped_link() {
    let rig = connected_rig().await;
    let mut events = rig.manager.subscribe();

    rig.ble.set_link_up(false);

    let interrupted = wait_for(&mut events, |e| matches!(e, LinkEvent::Interrupted(_))).await;
    match interrupted {
        Some(LinkEvent::Interrupted(device)) => assert_eq!(device.id, "AA:01"),
        other => panic!("expected an interruption, got {:?}", other),
    }
    let notice = wait_for(&mut events, |e| matches!(e, LinkEvent::Notice(_))).await;
    match notice {
        Some(LinkEvent::Notice(notice)) => {
            assert_eq!(notice.kind, NoticeKind::Blocking);
            assert_eq!(notice.action, Some(NoticeAction::Reconnect));
        }
        other => panic!("expected a notice, got {:?}", other),
    }
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
    assert!(rig.manager.snapshot().await.capabilities.is_empty());
    assert_eq!(
        rig.manager.last_device().await.map(|d| d.id),
        Some("AA:01".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn adapter_disconnect_event_interrupts_the_connection() {
    let rig = connected_rig().await;
    let mut events = rig.manager.subscribe();

    rig.ble.push(AdapterEvent::Disconnected {
        device_id: "AA:01".to_string(),
    });

    assert!(wait_for(&mut events, |e| matches!(e, LinkEvent::Interrupted(_)))
        .await
        .is_some());
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_events_for_other_devices_are_ignored() {
    let rig = connected_rig().await;

    rig.ble.push(AdapterEvent::Disconnected {
        device_id: "CC:03".to_string(),
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(rig.manager.status().await, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn user_disconnect_stops_polling_without_interruption() {
    let rig = connected_rig().await;
    let mut events = rig.manager.subscribe();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(rig.ble.polls() >= 2);

    rig.manager.disconnect().await.unwrap();
    let polls_at_disconnect = rig.ble.polls();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(rig.ble.polls(), polls_at_disconnect);
    let seen = events.drain();
    assert!(seen.iter().any(|e| matches!(e, LinkEvent::Disconnected(_))));
    assert!(!seen.iter().any(|e| matches!(e, LinkEvent::Interrupted(_))));
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn detected_link_loss_stops_polling() {
    let rig = connected_rig().await;
    let mut events = rig.manager.subscribe();
    rig.ble.set_link_up(false);

    wait_for(&mut events, |e| matches!(e, LinkEvent::Interrupted(_))).await;
    let polls_at_loss = rig.ble.polls();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(rig.ble.polls(), polls_at_loss);
}

#[tokio::test(start_paused = true)]
async fn failed_adapter_disconnect_still_clears_the_connection() {
    let rig = connected_rig().await;
    rig.ble.behave(|b| b.fail_disconnect = true);

    rig.manager.disconnect().await.unwrap();

    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
    assert_eq!(rig.ble.disconnect_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_without_connection_is_rejected() {
    let rig = rig().await;

    assert_eq!(rig.manager.disconnect().await, Err(LinkError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn reconnect_without_history_is_rejected() {
    let rig = rig().await;

    assert_eq!(rig.manager.reconnect().await.unwrap_err(), LinkError::NoPreviousDevice);
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_interruption_restores_the_connection() {
    let rig = connected_rig().await;
    let mut events = rig.manager.subscribe();
    rig.ble.set_link_up(false);
    wait_for(&mut events, |e| matches!(e, LinkEvent::Interrupted(_))).await;

    let snapshot = rig.manager.reconnect().await.unwrap();

    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.device.map(|d| d.id), Some("AA:01".to_string()));
    assert_eq!(snapshot.readings.battery_level, Some(78));
    assert_eq!(rig.ble.connect_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_keeps_the_device_for_another_attempt() {
    let rig = connected_rig().await;
    rig.manager.disconnect().await.unwrap();
    rig.ble.behave(|b| b.fail_connect = Some("out of range".to_string()));

    let result = rig.manager.reconnect().await;

    assert!(matches!(result, Err(LinkError::ReconnectFailed { .. })));
    assert_eq!(rig.manager.status().await, ConnectionStatus::Disconnected);
    assert_eq!(
        rig.manager.last_device().await.map(|d| d.id),
        Some("AA:01".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn invoke_runs_supported_operations() {
    let rig = connected_rig().await;
    let snapshot = rig.manager.snapshot().await;
    let battery = &snapshot.capabilities[0];
    let vendor = &snapshot.capabilities[4];

    let read = rig.manager.invoke(battery, Operation::Read).await.unwrap();
    let notify = rig.manager.invoke(battery, Operation::Notify).await.unwrap();
    let write = rig.manager.invoke(vendor, Operation::Write).await.unwrap();

    match read {
        InvocationOutcome::Read(value) => assert_eq!(value.hex, "4e"),
        other => panic!("expected a read value, got {:?}", other),
    }
    assert_eq!(notify, InvocationOutcome::NotifyArmed);
    assert_eq!(write, InvocationOutcome::Written);
    assert_eq!(
        rig.ble.write_calls.lock().unwrap().clone(),
        vec![(VENDOR_WRITE.to_string(), b"Hello BLE".to_vec())]
    );
}

#[tokio::test(start_paused = true)]
async fn unsupported_operation_never_reaches_the_adapter() {
    let rig = connected_rig().await;
    let snapshot = rig.manager.snapshot().await;
    let vendor = &snapshot.capabilities[4];
    let reads_before = rig.ble.reads().len();

    let result = rig.manager.invoke(vendor, Operation::Read).await;

    assert!(matches!(
        result,
        Err(LinkError::OperationFailed { operation: Operation::Read, .. })
    ));
    assert_eq!(rig.ble.reads().len(), reads_before);
    assert_eq!(rig.manager.status().await, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn failed_read_leaves_the_connection_up() {
    let rig = connected_rig().await;
    let snapshot = rig.manager.snapshot().await;
    let serial = snapshot
        .capabilities
        .iter()
        .find(|c| c.characteristic_id == SERIAL_NUMBER)
        .unwrap();

    let result = rig.manager.invoke(serial, Operation::Read).await;

    assert!(matches!(result, Err(LinkError::OperationFailed { .. })));
    assert_eq!(rig.manager.status().await, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn invoke_without_connection_is_rejected() {
    let rig = connected_rig().await;
    let capability = rig.manager.snapshot().await.capabilities[0].clone();
    rig.manager.disconnect().await.unwrap();

    let result = rig.manager.invoke(&capability, Operation::Read).await;

    assert_eq!(result, Err(LinkError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn scan_upserts_repeated_sightings_and_ranks_audio_first() {
    let rig = rig().await;
    let mut events = rig.manager.subscribe();
    rig.ble.behave(|b| {
        b.scan_results = vec![
            device("01", "Thermometer", BLE).with_rssi(Some(-70)),
            device("02", "Sport Earbuds", BLE).with_rssi(Some(-80)),
            device("01", "Thermometer", BLE).with_rssi(Some(-50)),
        ];
    });

    rig.manager.start_scan(BLE).await.unwrap();
    assert!(matches!(events.recv().await, Some(LinkEvent::ScanStarted(BLE))));
    wait_for(&mut events, |e| matches!(e, LinkEvent::ScanComplete(BLE))).await;

    let ranked = rig.manager.ranked_devices(BLE);
    let ids: Vec<&str> = ranked.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["02", "01"]);
    assert_eq!(ranked[1].rssi, Some(-50));
    assert!(!rig.manager.is_scanning(BLE));
}

#[tokio::test(start_paused = true)]
async fn scan_with_radio_off_reports_adapter_unavailable() {
    let rig = rig().await;
    rig.ble.enabled.store(false, Ordering::SeqCst);

    let error = rig.manager.start_scan(BLE).await.unwrap_err();

    assert!(matches!(error, LinkError::AdapterUnavailable { family: BLE, .. }));
    assert_eq!(error.notice().kind, NoticeKind::Blocking);
    assert!(!rig.manager.is_scanning(BLE));
}

#[tokio::test(start_paused = true)]
async fn classic_collection_prefers_paired_entries() {
    let rig = rig().await;
    let classic = TransportFamily::Classic;
    rig.classic.behave(|b| {
        b.bonded = vec![
            device("C1", "Car Kit", classic).bonded(true),
            device("C2", "WH-1000XM4 Headphones", classic).bonded(true),
        ];
        b.discovered = vec![
            device("C2", "Unnamed", classic),
            device("C3", "Party Audio Box", classic),
        ];
    });

    let devices = rig.manager.collect_classic_devices().await.unwrap();

    let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["C2", "C3", "C1"]);
    assert_eq!(devices[0].name.as_deref(), Some("WH-1000XM4 Headphones"));
    assert!(devices[0].bonded);
}

#[tokio::test(start_paused = true)]
async fn classic_connection_reports_the_audio_stream() {
    let rig = rig().await;
    let classic = TransportFamily::Classic;
    rig.classic.behave(|b| {
        b.introspection.characteristics = vec![characteristic(
            "classic-audio-service",
            "audio-stream",
            &[headset_link_lib::core::bluetooth::Property::Audio],
        )];
    });

    let snapshot = rig
        .manager
        .connect(&device("C2", "Headphones", classic))
        .await
        .unwrap();

    assert_eq!(snapshot.capabilities.len(), 1);
    assert_eq!(snapshot.capabilities[0].service_name, "Classic Audio Service");
    assert_eq!(snapshot.capabilities[0].characteristic_name, "Audio Stream");
    assert!(snapshot.readings.is_empty());
    assert!(rig.classic.reads().is_empty());
    assert_eq!(rig.ble.connect_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_device_looks_up_discovered_devices() {
    let rig = rig().await;

    let result = rig.manager.connect_device(BLE, "missing").await;

    assert!(matches!(result, Err(LinkError::ConnectFailed { .. })));
    assert_eq!(rig.ble.connect_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn manual_announcement_requires_a_connection() {
    let rig = rig().await;

    assert_eq!(rig.manager.announce_time().await, Err(LinkError::NotConnected));
    assert!(rig.speech.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn periodic_announcements_only_while_connected() {
    let mut config = AppConfig::default();
    config.link.auto_broadcast = true;
    let mut rig = rig_with(config).await;
    rig.ble.behave(|b| b.introspection = headset_introspection());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(rig.speech.spoken().is_empty());

    rig.manager
        .connect(&device("AA:01", "Acme", BLE))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    let spoken = rig.speech.spoken();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].starts_with(AUTO_ANNOUNCEMENT_PREFIX));

    rig.manager.shutdown().await;
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(rig.speech.spoken().len(), 1);
    assert!(!rig.manager.is_auto_broadcast());
}

#[tokio::test(start_paused = true)]
async fn radio_power_loss_raises_a_notice() {
    let rig = rig().await;
    let mut events = rig.manager.subscribe();

    rig.ble.push(AdapterEvent::StateChanged { powered: false });

    let notice = wait_for(&mut events, |e| matches!(e, LinkEvent::Notice(_))).await;
    assert!(matches!(notice, Some(LinkEvent::Notice(n)) if n.kind == NoticeKind::Blocking));
}

#[tokio::test(start_paused = true)]
async fn read_failures_are_transport_errors_not_panics() {
    let rig = rig().await;
    rig.ble.behave(|b| {
        b.introspection = headset_introspection();
        b.reads.insert(
            BATTERY_LEVEL.into(),
            Err(TransportError::Failed("gatt error 0x0e".to_string())),
        );
        b.reads.insert(MANUFACTURER_NAME.into(), Ok(Vec::new()));
    });

    let snapshot = rig
        .manager
        .connect(&device("AA:01", "Acme", BLE))
        .await
        .unwrap();

    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.readings.battery_level, None);
    assert_eq!(snapshot.readings.get("manufacturer").as_deref(), Some(""));
    // battery, model, serial
    assert_eq!(snapshot.unreadable_fields, 3);
}
