//! Defines shared data structures for the bridge: the value records pushed
//! into poll queues and the poll status returned to the caller.

use serde::Serialize;
use uuid::Uuid;

use crate::constants::{
    MAX_DESCRIPTION_LEN, MAX_DEVICE_ID_LEN, MAX_DEVICE_NAME_LEN, MAX_PAYLOAD_LEN,
};

/// Outcome of polling a scan queue.
///
/// `Finished` is terminal for a given scan: once the producer has marked the
/// queue finished and it has drained, every subsequent poll yields `Finished`
/// until a new scan of the same kind is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPoll<T> {
    /// An item was dequeued.
    Available(T),
    /// No item yet; the producing scan is still running.
    Processing,
    /// The scan completed (or was cancelled) and the queue is empty.
    Finished,
}

impl<T> ScanPoll<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            ScanPoll::Available(item) => Some(item),
            _ => None,
        }
    }
}

/// A discovered device, or an update to an already-reported one.
///
/// `name` and `is_connectable` are `None` when the underlying platform event
/// did not carry the field; the caller keeps its previous value in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceUpdate {
    pub id: String,
    pub name: Option<String>,
    pub is_connectable: Option<bool>,
}

impl DeviceUpdate {
    pub fn new(id: impl Into<String>, name: Option<String>, is_connectable: Option<bool>) -> Self {
        Self {
            id: truncate_chars(id.into(), MAX_DEVICE_ID_LEN),
            name: name.map(|n| truncate_chars(n, MAX_DEVICE_NAME_LEN)),
            is_connectable,
        }
    }
}

/// A service reported by a service scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    pub uuid: Uuid,
}

/// A characteristic reported by a characteristic scan, augmented with the
/// user description read from its 0x2901 descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicRecord {
    pub uuid: Uuid,
    pub user_description: String,
}

impl CharacteristicRecord {
    pub fn new(uuid: Uuid, user_description: impl Into<String>) -> Self {
        Self {
            uuid,
            user_description: truncate_chars(user_description.into(), MAX_DESCRIPTION_LEN),
        }
    }
}

/// A notification payload (inbound) or a write request (outbound), addressed
/// by the full device/service/characteristic triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BleData {
    pub device_id: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub payload: Vec<u8>,
}

impl BleData {
    pub fn new(
        device_id: impl Into<String>,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        payload: &[u8],
    ) -> Self {
        let mut payload = payload.to_vec();
        payload.truncate(MAX_PAYLOAD_LEN);
        Self {
            device_id: truncate_chars(device_id.into(), MAX_DEVICE_ID_LEN),
            service_uuid,
            characteristic_uuid,
            payload,
        }
    }
}

/// Link-level connection state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// A connection-status transition pushed into the connection queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionUpdate {
    pub device_id: String,
    pub status: ConnectionStatus,
}

/// A BLE-capable radio reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RadioInfo {
    pub name: String,
    pub powered: bool,
}

/// Whether a GATT lookup may be served from the platform cache or must hit
/// the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cached,
    Uncached,
}

/// Truncate to at most `max` characters, never splitting a code point.
fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_payloads_truncate_silently() {
        let long_name = "x".repeat(MAX_DEVICE_NAME_LEN + 10);
        let update = DeviceUpdate::new("dev", Some(long_name), None);
        assert_eq!(update.name.unwrap().chars().count(), MAX_DEVICE_NAME_LEN);

        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let data = BleData::new("dev", Uuid::nil(), Uuid::nil(), &payload);
        assert_eq!(data.payload.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(MAX_DEVICE_NAME_LEN + 1);
        let update = DeviceUpdate::new("dev", Some(s), None);
        assert_eq!(update.name.unwrap().chars().count(), MAX_DEVICE_NAME_LEN);
    }
}
