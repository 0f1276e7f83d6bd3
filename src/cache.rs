//! Identity hashing and the three-level resource cache memoizing resolved
//! adapter handles (device -> service -> characteristic).
//!
//! The cache is a strict tree: a service entry cannot exist without its
//! parent device entry. Entries own their handles; evicting an entry drops
//! the `Arc`s and with them the underlying platform objects. Concurrent
//! misses for the same key are not deduplicated -- two resolvers may both
//! hit the adapter and the second insert overwrites an equivalent handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::adapter::{CharacteristicHandle, DeviceHandle, ServiceHandle};

/// Stable small key derived from a UUID/device-id string. Collisions are
/// negligible for the UUID space in practice; accepted, not eliminated.
pub type IdKey = u64;

/// djb2 over the id's UTF-16 code units. Deterministic within one process
/// only; never persisted. The empty string maps to the seed and is a valid,
/// distinct key.
pub fn hash_id(id: &str) -> IdKey {
    let mut hash: u64 = 5381;
    for unit in id.encode_utf16() {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(unit));
    }
    hash
}

pub struct CharacteristicEntry {
    pub handle: Arc<dyn CharacteristicHandle>,
}

pub struct ServiceEntry {
    pub handle: Arc<dyn ServiceHandle>,
    pub characteristics: HashMap<IdKey, CharacteristicEntry>,
}

pub struct DeviceEntry {
    pub handle: Arc<dyn DeviceHandle>,
    pub services: HashMap<IdKey, ServiceEntry>,
    /// Revoker for the connection-status watcher; installed at most once.
    pub status_watch: Option<CancellationToken>,
}

pub struct ResourceCache {
    devices: Mutex<HashMap<IdKey, DeviceEntry>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self, key: IdKey) -> Option<Arc<dyn DeviceHandle>> {
        self.devices
            .lock()
            .unwrap()
            .get(&key)
            .map(|entry| entry.handle.clone())
    }

    pub fn service(&self, device: IdKey, service: IdKey) -> Option<Arc<dyn ServiceHandle>> {
        self.devices
            .lock()
            .unwrap()
            .get(&device)
            .and_then(|entry| entry.services.get(&service))
            .map(|entry| entry.handle.clone())
    }

    pub fn characteristic(
        &self,
        device: IdKey,
        service: IdKey,
        characteristic: IdKey,
    ) -> Option<Arc<dyn CharacteristicHandle>> {
        self.devices
            .lock()
            .unwrap()
            .get(&device)
            .and_then(|entry| entry.services.get(&service))
            .and_then(|entry| entry.characteristics.get(&characteristic))
            .map(|entry| entry.handle.clone())
    }

    /// Insert or overwrite the device handle, keeping any services already
    /// resolved under the key.
    pub fn insert_device(&self, key: IdKey, handle: Arc<dyn DeviceHandle>) {
        let mut devices = self.devices.lock().unwrap();
        devices
            .entry(key)
            .and_modify(|entry| entry.handle = handle.clone())
            .or_insert_with(|| DeviceEntry {
                handle,
                services: HashMap::new(),
                status_watch: None,
            });
    }

    /// Returns false if the parent device entry is gone (evicted between
    /// resolution and insert); the resolution is then simply dropped.
    pub fn insert_service(
        &self,
        device: IdKey,
        service: IdKey,
        handle: Arc<dyn ServiceHandle>,
    ) -> bool {
        let mut devices = self.devices.lock().unwrap();
        match devices.get_mut(&device) {
            Some(entry) => {
                entry.services.insert(
                    service,
                    ServiceEntry {
                        handle,
                        characteristics: HashMap::new(),
                    },
                );
                true
            }
            None => false,
        }
    }

    pub fn insert_characteristic(
        &self,
        device: IdKey,
        service: IdKey,
        characteristic: IdKey,
        handle: Arc<dyn CharacteristicHandle>,
    ) -> bool {
        let mut devices = self.devices.lock().unwrap();
        match devices
            .get_mut(&device)
            .and_then(|entry| entry.services.get_mut(&service))
        {
            Some(entry) => {
                entry
                    .characteristics
                    .insert(characteristic, CharacteristicEntry { handle });
                true
            }
            None => false,
        }
    }

    /// Install the status-watch revoker if none is present. Returns true if
    /// the caller now owns the subscription and must spawn the watcher.
    pub fn mark_status_subscribed(&self, key: IdKey, token: CancellationToken) -> bool {
        let mut devices = self.devices.lock().unwrap();
        match devices.get_mut(&key) {
            Some(entry) if entry.status_watch.is_none() => {
                entry.status_watch = Some(token);
                true
            }
            _ => false,
        }
    }

    /// Remove a device subtree. The caller cancels the returned entry's
    /// status watch; handles are released when the entry drops.
    pub fn evict_device(&self, key: IdKey) -> Option<DeviceEntry> {
        self.devices.lock().unwrap().remove(&key)
    }

    /// Remove every device subtree; used only by global teardown.
    pub fn clear_all(&self) -> Vec<DeviceEntry> {
        let mut devices = self.devices.lock().unwrap();
        devices.drain().map(|(_, entry)| entry).collect()
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_id("BluetoothLE#abc"), hash_id("BluetoothLE#abc"));
        assert_ne!(hash_id("device-a"), hash_id("device-b"));
    }

    #[test]
    fn empty_string_is_a_valid_distinct_key() {
        assert_eq!(hash_id(""), 5381);
        assert_ne!(hash_id(""), hash_id(" "));
    }

    #[test]
    fn service_requires_parent_device() {
        let cache = ResourceCache::new();
        let orphan = crate::adapter::mock::MockAdapter::new();
        orphan.add_device("d1");
        // no device entry inserted for this key
        assert!(!cache.insert_service(
            hash_id("missing"),
            hash_id("svc"),
            test_service(&orphan),
        ));
    }

    fn test_service(mock: &crate::adapter::mock::MockAdapter) -> Arc<dyn ServiceHandle> {
        let uuid = uuid::Uuid::from_u128(0x1234);
        mock.add_service("d1", uuid);
        mock.service_handle("d1", uuid).unwrap()
    }
}
