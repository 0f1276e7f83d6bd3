//! The resolution pipeline: three chained cache-checked stages mapping
//! string ids to adapter handles.
//!
//! Each stage consults the resource cache before touching the adapter and
//! reports failures through the error sink rather than returning errors; a
//! failed stage leaves the cache untouched so the key stays retryable. The
//! first successful device resolution also installs the device's
//! connection-status watcher and immediately enqueues its current status.

use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{BleAdapter, CharacteristicHandle, DeviceHandle, ServiceHandle};
use crate::cache::{hash_id, IdKey, ResourceCache};
use crate::cancel::CancelController;
use crate::error::{BleError, BleResult, ErrorSink};
use crate::queue::PollQueue;
use crate::types::{CacheMode, ConnectionUpdate};

/// Parse a service/characteristic id string. Ids are hashed raw for cache
/// keys but the adapter needs the structured form.
pub(crate) fn parse_id(id: &str) -> BleResult<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|e| BleError::InvalidId(format!("{id}: {e}")))
}

pub struct ResolutionPipeline {
    adapter: Arc<dyn BleAdapter>,
    cache: Arc<ResourceCache>,
    errors: Arc<ErrorSink>,
    connections: Arc<PollQueue<ConnectionUpdate>>,
    cancel: Arc<CancelController>,
}

impl ResolutionPipeline {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        cache: Arc<ResourceCache>,
        errors: Arc<ErrorSink>,
        connections: Arc<PollQueue<ConnectionUpdate>>,
        cancel: Arc<CancelController>,
    ) -> Self {
        Self {
            adapter,
            cache,
            errors,
            connections,
            cancel,
        }
    }

    pub async fn resolve_device(&self, device_id: &str) -> Option<Arc<dyn DeviceHandle>> {
        let key = hash_id(device_id);
        if let Some(handle) = self.cache.device(key) {
            self.ensure_status_subscription(key, &handle).await;
            return Some(handle);
        }
        if self.cancel.is_quit() {
            return None;
        }

        match self.adapter.open_device(device_id).await {
            Ok(Some(handle)) => {
                debug!("resolved device {device_id}");
                self.errors.clear();
                self.cache.insert_device(key, handle.clone());
                self.ensure_status_subscription(key, &handle).await;
                Some(handle)
            }
            Ok(None) => {
                self.errors.record(&BleError::DeviceUnavailable(format!(
                    "failed to connect to device {device_id}"
                )));
                None
            }
            Err(e) => {
                self.errors.record(&e);
                None
            }
        }
    }

    pub async fn resolve_service(
        &self,
        device_id: &str,
        service_id: &str,
    ) -> Option<Arc<dyn ServiceHandle>> {
        let device = self.resolve_device(device_id).await?;
        let (dkey, skey) = (hash_id(device_id), hash_id(service_id));
        if let Some(handle) = self.cache.service(dkey, skey) {
            return Some(handle);
        }

        let uuid = match parse_id(service_id) {
            Ok(uuid) => uuid,
            Err(e) => {
                self.errors.record(&e);
                return None;
            }
        };
        match device.service_for_uuid(uuid, CacheMode::Cached).await {
            Ok(Some(handle)) => {
                self.errors.clear();
                self.cache.insert_service(dkey, skey, handle.clone());
                Some(handle)
            }
            Ok(None) => {
                self.errors.record(&BleError::ServiceNotFound(format!(
                    "no service found with uuid {service_id}"
                )));
                None
            }
            Err(e) => {
                self.errors.record(&e);
                None
            }
        }
    }

    pub async fn resolve_characteristic(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
    ) -> Option<Arc<dyn CharacteristicHandle>> {
        let service = self.resolve_service(device_id, service_id).await?;
        let (dkey, skey, ckey) = (
            hash_id(device_id),
            hash_id(service_id),
            hash_id(characteristic_id),
        );
        if let Some(handle) = self.cache.characteristic(dkey, skey, ckey) {
            return Some(handle);
        }

        let uuid = match parse_id(characteristic_id) {
            Ok(uuid) => uuid,
            Err(e) => {
                self.errors.record(&e);
                return None;
            }
        };
        match service.characteristic_for_uuid(uuid, CacheMode::Cached).await {
            Ok(Some(handle)) => {
                self.errors.clear();
                self.cache
                    .insert_characteristic(dkey, skey, ckey, handle.clone());
                Some(handle)
            }
            Ok(None) => {
                self.errors.record(&BleError::CharacteristicNotFound(format!(
                    "no characteristic found with uuid {characteristic_id}"
                )));
                None
            }
            Err(e) => {
                self.errors.record(&e);
                None
            }
        }
    }

    /// Resolve and link the device, then probe its GATT table from the
    /// platform cache so access failures surface early.
    pub async fn connect(&self, device_id: &str) -> bool {
        let Some(device) = self.resolve_device(device_id).await else {
            return false;
        };
        if let Err(e) = device.connect().await {
            self.errors.record(&e);
            return false;
        }
        match device.services(CacheMode::Cached).await {
            Ok(_) => {
                info!("device {device_id} connected");
                self.errors.clear();
                true
            }
            Err(e) => {
                self.errors.record(&e);
                false
            }
        }
    }

    /// Install the connection-status watcher for a cached device, once. The
    /// current status is enqueued immediately; transitions follow from a
    /// watcher task that exits on device eviction or global quit.
    async fn ensure_status_subscription(&self, key: IdKey, device: &Arc<dyn DeviceHandle>) {
        let token = self.cancel.child();
        if !self.cache.mark_status_subscribed(key, token.clone()) {
            return;
        }

        let status = device.connection_status().await;
        self.connections.push(ConnectionUpdate {
            device_id: device.id(),
            status,
        });

        let connections = self.connections.clone();
        let device = device.clone();
        tokio::spawn(async move {
            let mut events = match device.status_stream().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("status watch failed for {}: {e}", device.id());
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.next() => match event {
                        Some(status) => connections.push(ConnectionUpdate {
                            device_id: device.id(),
                            status,
                        }),
                        None => break,
                    },
                }
            }
        });
    }
}
