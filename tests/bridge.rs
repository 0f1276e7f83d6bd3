//! End-to-end tests of the bridge facade over the scripted adapter.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use ble_bridge::constants::NO_DESCRIPTION;
use ble_bridge::{
    BleBridge, BleData, ConnectionStatus, DeviceUpdate, MockAdapter, ScanPoll, OK_SENTINEL,
};

const DEVICE: &str = "BluetoothLE#BluetoothLE00:11:22:33:44:55-aa:bb:cc:dd:ee:ff";
const SERVICE: &str = "0000180d-0000-1000-8000-00805f9b34fb";
const CHARACTERISTIC: &str = "00002a37-0000-1000-8000-00805f9b34fb";

fn uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap()
}

/// A mock with one device carrying a heart-rate service and measurement
/// characteristic, plus a bridge over it.
fn bridge_with_device() -> (MockAdapter, BleBridge) {
    let mock = MockAdapter::new();
    mock.add_device(DEVICE);
    mock.add_service(DEVICE, uuid(SERVICE));
    mock.add_characteristic(
        DEVICE,
        uuid(SERVICE),
        uuid(CHARACTERISTIC),
        Some("Heart Rate Measurement"),
    );
    let bridge = BleBridge::new(Arc::new(mock.clone())).unwrap();
    (mock, bridge)
}

fn settle() {
    thread::sleep(Duration::from_millis(200));
}

#[test]
fn device_scan_reports_updates_then_finishes() {
    let (mock, bridge) = bridge_with_device();
    mock.advertise(DeviceUpdate::new("dev-1", Some("Polar H10".to_string()), Some(true)));
    mock.advertise(DeviceUpdate::new("dev-2", None, None));

    bridge.start_device_scan(0);
    let first = bridge.poll_device(true);
    let second = bridge.poll_device(true);
    assert_eq!(
        first,
        ScanPoll::Available(DeviceUpdate::new("dev-1", Some("Polar H10".to_string()), Some(true)))
    );
    assert_eq!(second, ScanPoll::Available(DeviceUpdate::new("dev-2", None, None)));

    bridge.stop_device_scan();
    assert_eq!(bridge.poll_device(true), ScanPoll::Finished);
    // finished is terminal until the next scan
    assert_eq!(bridge.poll_device(false), ScanPoll::Finished);
}

#[test]
fn timed_scan_finishes_on_its_own() {
    let (mock, bridge) = bridge_with_device();
    mock.advertise(DeviceUpdate::new("dev-1", None, None));

    bridge.start_device_scan(1);
    assert!(matches!(bridge.poll_device(true), ScanPoll::Available(_)));
    assert_eq!(bridge.poll_device(true), ScanPoll::Finished);
}

#[test]
fn nonblocking_poll_reports_processing_while_scan_runs() {
    let (_mock, bridge) = bridge_with_device();
    bridge.start_device_scan(0);
    settle();
    assert_eq!(bridge.poll_device(false), ScanPoll::Processing);
    bridge.stop_device_scan();
}

#[test]
fn scan_start_clears_quit_flag() {
    let (mock, bridge) = bridge_with_device();
    bridge.quit();
    assert_eq!(bridge.poll_device(false), ScanPoll::Finished);

    bridge.start_device_scan(0);
    mock.advertise(DeviceUpdate::new("dev-1", None, None));
    assert!(matches!(bridge.poll_device(true), ScanPoll::Available(_)));
    bridge.stop_device_scan();
}

#[test]
fn quit_wakes_blocked_poller() {
    let (_mock, bridge) = bridge_with_device();
    let bridge = Arc::new(bridge);
    let poller = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.poll_data(true))
    };
    settle();
    bridge.quit();
    assert_eq!(poller.join().unwrap(), None);
}

#[test]
fn device_resolution_is_cached() {
    let (mock, bridge) = bridge_with_device();
    assert!(bridge.connect_device(DEVICE, true));
    assert!(bridge.connect_device(DEVICE, true));
    assert_eq!(mock.open_count(DEVICE), 1);
    assert_eq!(bridge.last_error(), OK_SENTINEL);
}

#[test]
fn connecting_unknown_device_records_error() {
    let (_mock, bridge) = bridge_with_device();
    assert!(!bridge.connect_device("no-such-device", true));
    assert_ne!(bridge.last_error(), OK_SENTINEL);
    assert!(bridge.last_error().contains("no-such-device"));

    // the next success resets the sink
    assert!(bridge.connect_device(DEVICE, true));
    assert_eq!(bridge.last_error(), OK_SENTINEL);
}

#[test]
fn service_scan_lists_services() {
    let (_mock, bridge) = bridge_with_device();
    bridge.scan_services(DEVICE);
    match bridge.poll_service(true) {
        ScanPoll::Available(record) => assert_eq!(record.uuid, uuid(SERVICE)),
        other => panic!("expected a service record, got {other:?}"),
    }
    assert_eq!(bridge.poll_service(true), ScanPoll::Finished);
}

#[test]
fn characteristic_scan_reports_descriptions_and_sentinel() {
    let (mock, bridge) = bridge_with_device();
    let bare = uuid("00002a38-0000-1000-8000-00805f9b34fb");
    mock.add_characteristic(DEVICE, uuid(SERVICE), bare, None);

    bridge.scan_characteristics(DEVICE, SERVICE);
    let mut records = Vec::new();
    loop {
        match bridge.poll_characteristic(true) {
            ScanPoll::Available(record) => records.push(record),
            ScanPoll::Finished => break,
            ScanPoll::Processing => unreachable!("blocking poll never returns Processing"),
        }
    }

    assert_eq!(records.len(), 2);
    let described = records.iter().find(|r| r.uuid == uuid(CHARACTERISTIC)).unwrap();
    assert_eq!(described.user_description, "Heart Rate Measurement");
    let undescribed = records.iter().find(|r| r.uuid == bare).unwrap();
    assert_eq!(undescribed.user_description, NO_DESCRIPTION);
}

#[test]
fn scanning_unknown_service_finishes_with_error() {
    let (_mock, bridge) = bridge_with_device();
    bridge.scan_characteristics(DEVICE, "0000ffff-0000-1000-8000-00805f9b34fb");
    assert_eq!(bridge.poll_characteristic(true), ScanPoll::Finished);
    assert_ne!(bridge.last_error(), OK_SENTINEL);
}

#[test]
fn subscription_forwards_notifications() {
    let (mock, bridge) = bridge_with_device();
    assert!(bridge.subscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC, true));
    assert!(mock.notify(DEVICE, uuid(SERVICE), uuid(CHARACTERISTIC), &[0x16, 72]));

    let data = bridge.poll_data(true).unwrap();
    assert_eq!(data.device_id, DEVICE);
    assert_eq!(data.service_uuid, uuid(SERVICE));
    assert_eq!(data.characteristic_uuid, uuid(CHARACTERISTIC));
    assert_eq!(data.payload, vec![0x16, 72]);
}

#[test]
fn subscribe_fails_when_notify_enable_fails() {
    let (mock, bridge) = bridge_with_device();
    mock.set_subscribe_failure(true);
    assert!(!bridge.subscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC, true));
    assert_ne!(bridge.last_error(), OK_SENTINEL);

    mock.set_subscribe_failure(false);
    assert!(bridge.subscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC, true));
}

#[test]
fn failed_unsubscribe_keeps_the_subscription_alive() {
    let (mock, bridge) = bridge_with_device();
    assert!(bridge.subscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC, true));

    mock.set_unsubscribe_failure(true);
    assert!(!bridge.unsubscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC));
    assert_ne!(bridge.last_error(), OK_SENTINEL);

    // still subscribed: notifications keep flowing
    assert!(mock.notify(DEVICE, uuid(SERVICE), uuid(CHARACTERISTIC), &[1]));
    assert_eq!(bridge.poll_data(true).unwrap().payload, vec![1]);

    // and the retry succeeds
    mock.set_unsubscribe_failure(false);
    assert!(bridge.unsubscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC));
    settle();
    mock.notify(DEVICE, uuid(SERVICE), uuid(CHARACTERISTIC), &[2]);
    settle();
    assert_eq!(bridge.poll_data(false), None);
}

#[test]
fn unsubscribe_without_subscription_fails() {
    let (_mock, bridge) = bridge_with_device();
    assert!(!bridge.unsubscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC));
    assert_ne!(bridge.last_error(), OK_SENTINEL);
}

#[test]
fn disconnect_evicts_the_device_subtree() {
    let (mock, bridge) = bridge_with_device();
    assert!(bridge.connect_device(DEVICE, true));
    assert!(bridge.subscribe_characteristic(DEVICE, SERVICE, CHARACTERISTIC, true));

    assert!(bridge.disconnect_device(DEVICE));
    settle();

    // the forwarding task is gone, notifications are dropped
    mock.notify(DEVICE, uuid(SERVICE), uuid(CHARACTERISTIC), &[9]);
    settle();
    assert_eq!(bridge.poll_data(false), None);

    // re-resolution goes back to the adapter
    assert!(bridge.connect_device(DEVICE, true));
    assert_eq!(mock.open_count(DEVICE), 2);
}

#[test]
fn disconnecting_unresolved_device_fails() {
    let (_mock, bridge) = bridge_with_device();
    assert!(!bridge.disconnect_device(DEVICE));
    assert_ne!(bridge.last_error(), OK_SENTINEL);
}

#[test]
fn connection_queue_reports_status() {
    let (mock, bridge) = bridge_with_device();
    assert!(bridge.connect_device(DEVICE, true));

    // the first update is the status at resolution time
    let initial = bridge.poll_connection(true).unwrap();
    assert_eq!(initial.device_id, DEVICE);
    assert_eq!(initial.status, ConnectionStatus::Disconnected);

    settle();
    mock.set_connection_status(DEVICE, ConnectionStatus::Connected);
    let update = bridge.poll_connection(true).unwrap();
    assert_eq!(update.status, ConnectionStatus::Connected);
}

#[test]
fn disconnect_enqueues_a_final_update() {
    let (_mock, bridge) = bridge_with_device();
    assert!(bridge.connect_device(DEVICE, true));
    assert!(bridge.disconnect_device(DEVICE));

    let mut saw_disconnect = false;
    while let Some(update) = bridge.poll_connection(false) {
        if update.status == ConnectionStatus::Disconnected && update.device_id == DEVICE {
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect);
}

#[test]
fn send_data_writes_the_payload() {
    let (mock, bridge) = bridge_with_device();
    let packet = BleData::new(DEVICE, uuid(SERVICE), uuid(CHARACTERISTIC), &[0x01, 0x02, 0x03]);
    assert!(bridge.send_data(&packet, true));
    assert_eq!(
        mock.written(DEVICE, uuid(SERVICE), uuid(CHARACTERISTIC)),
        vec![vec![0x01, 0x02, 0x03]]
    );
    assert_eq!(bridge.last_error(), OK_SENTINEL);
}

#[test]
fn radios_and_availability_follow_the_adapter() {
    let (mock, bridge) = bridge_with_device();
    let radios = bridge.radios();
    assert_eq!(radios.len(), 1);
    assert!(radios[0].powered);
    assert!(bridge.is_bluetooth_available());

    mock.set_available(false);
    assert!(!bridge.is_bluetooth_available());
}

#[test]
fn invalid_uuid_is_rejected() {
    let (_mock, bridge) = bridge_with_device();
    assert!(!bridge.subscribe_characteristic(DEVICE, "not-a-uuid", CHARACTERISTIC, true));
    assert_ne!(bridge.last_error(), OK_SENTINEL);
}
