//! The bridge facade: every boundary operation as a synchronous method.
//!
//! `BleBridge` is an explicit context object owning all shared state (no
//! process-wide singletons): a dedicated tokio runtime, the adapter, the
//! resource cache, the five poll queues, the subscription registry, the
//! cancellation controller and the error sink. Multiple independent bridges
//! can coexist; dropping one tears it down.
//!
//! Every method is total: it returns a status value and never panics or
//! propagates an error past the boundary. Failures are readable through
//! [`BleBridge::last_error`] until the next successful operation.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::runtime::Runtime;

use crate::adapter::{system::SystemAdapter, BleAdapter};
use crate::cache::{hash_id, ResourceCache};
use crate::cancel::CancelController;
use crate::error::{BleError, ErrorSink};
use crate::queue::PollQueue;
use crate::resolver::ResolutionPipeline;
use crate::scanner::DeviceScanner;
use crate::subscription::SubscriptionRegistry;
use crate::types::{
    BleData, CacheMode, CharacteristicRecord, ConnectionStatus, ConnectionUpdate, DeviceUpdate,
    RadioInfo, ScanPoll, ServiceRecord,
};

pub struct BleBridge {
    runtime: Runtime,
    adapter: Arc<dyn BleAdapter>,
    cancel: Arc<CancelController>,
    errors: Arc<ErrorSink>,
    cache: Arc<ResourceCache>,
    resolver: Arc<ResolutionPipeline>,
    registry: Arc<SubscriptionRegistry>,
    scanner: DeviceScanner,
    devices: Arc<PollQueue<DeviceUpdate>>,
    services: Arc<PollQueue<ServiceRecord>>,
    characteristics: Arc<PollQueue<CharacteristicRecord>>,
    data: Arc<PollQueue<BleData>>,
    connections: Arc<PollQueue<ConnectionUpdate>>,
}

impl BleBridge {
    /// Create a bridge over the given adapter.
    pub fn new(adapter: Arc<dyn BleAdapter>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Self::with_runtime(runtime, adapter)
    }

    /// Create a bridge over the platform Bluetooth stack.
    pub fn with_system_adapter() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let adapter = runtime.block_on(SystemAdapter::new())?;
        Self::with_runtime(runtime, Arc::new(adapter))
    }

    fn with_runtime(runtime: Runtime, adapter: Arc<dyn BleAdapter>) -> Result<Self> {
        let cancel = Arc::new(CancelController::new());
        let errors = Arc::new(ErrorSink::new());
        let cache = Arc::new(ResourceCache::new());

        let devices = Arc::new(PollQueue::new(cancel.clone()));
        let services = Arc::new(PollQueue::new(cancel.clone()));
        let characteristics = Arc::new(PollQueue::new(cancel.clone()));
        let data = Arc::new(PollQueue::new(cancel.clone()));
        let connections = Arc::new(PollQueue::new(cancel.clone()));

        let resolver = Arc::new(ResolutionPipeline::new(
            adapter.clone(),
            cache.clone(),
            errors.clone(),
            connections.clone(),
            cancel.clone(),
        ));
        let registry = Arc::new(SubscriptionRegistry::new(
            data.clone(),
            errors.clone(),
            cancel.clone(),
        ));
        let scanner = DeviceScanner::new(
            adapter.clone(),
            devices.clone(),
            errors.clone(),
            cancel.clone(),
        );

        Ok(Self {
            runtime,
            adapter,
            cancel,
            errors,
            cache,
            resolver,
            registry,
            scanner,
            devices,
            services,
            characteristics,
            data,
            connections,
        })
    }

    /// Enumerate BLE-capable radios.
    pub fn radios(&self) -> Vec<RadioInfo> {
        match self.runtime.block_on(self.adapter.radios()) {
            Ok(radios) => {
                self.errors.clear();
                radios
            }
            Err(e) => {
                self.errors.record(&e);
                Vec::new()
            }
        }
    }

    /// True if at least one radio is present and powered.
    pub fn is_bluetooth_available(&self) -> bool {
        self.runtime.block_on(self.adapter.is_available())
    }

    /// Begin device discovery. `seconds == 0` keeps scanning until
    /// [`BleBridge::stop_device_scan`] or [`BleBridge::quit`].
    ///
    /// A scan start after a quit is treated as an implicit restart: the quit
    /// flag is cleared here and nowhere else.
    pub fn start_device_scan(&self, seconds: u32) {
        self.cancel.reset();
        self.errors.clear();
        let _guard = self.runtime.enter();
        self.scanner.start(seconds);
    }

    /// Stop an active device scan and release the platform watcher.
    pub fn stop_device_scan(&self) {
        self.scanner.stop();
    }

    pub fn poll_device(&self, block: bool) -> ScanPoll<DeviceUpdate> {
        self.devices.poll(block)
    }

    /// Resolve the device and probe its GATT table. Non-blocking mode spawns
    /// the work and reports optimistic success; the error sink carries any
    /// later failure.
    pub fn connect_device(&self, device_id: &str, block: bool) -> bool {
        if block {
            return self.runtime.block_on(self.resolver.connect(device_id));
        }
        let resolver = self.resolver.clone();
        let id = device_id.to_string();
        self.runtime.spawn(async move {
            resolver.connect(&id).await;
        });
        true
    }

    /// Drop the device subtree from the cache, revoke its subscriptions and
    /// status watch, and enqueue a final Disconnected update. Returns false
    /// if the device was never resolved.
    pub fn disconnect_device(&self, device_id: &str) -> bool {
        let key = hash_id(device_id);

        // lock order when structures nest: registry, then cache, then queue
        self.registry.remove_device(device_id);
        let Some(entry) = self.cache.evict_device(key) else {
            self.errors.record(&BleError::DeviceUnavailable(format!(
                "device {device_id} not cached"
            )));
            return false;
        };
        if let Some(token) = &entry.status_watch {
            token.cancel();
        }
        self.connections.push(ConnectionUpdate {
            device_id: device_id.to_string(),
            status: ConnectionStatus::Disconnected,
        });

        // tear down the platform link off-thread; handles drop with the entry
        let device = entry.handle.clone();
        self.runtime.spawn(async move {
            let _ = device.disconnect().await;
        });

        info!("device {device_id} disconnected and evicted");
        self.errors.clear();
        true
    }

    /// Enumerate the device's services into the service queue.
    pub fn scan_services(&self, device_id: &str) {
        self.services.reset_finished();
        let resolver = self.resolver.clone();
        let queue = self.services.clone();
        let errors = self.errors.clone();
        let cancel = self.cancel.clone();
        let id = device_id.to_string();
        self.runtime.spawn(async move {
            if let Some(device) = resolver.resolve_device(&id).await {
                match device.services(CacheMode::Uncached).await {
                    Ok(found) => {
                        for service in found {
                            if cancel.is_quit() {
                                break;
                            }
                            queue.push(ServiceRecord {
                                uuid: service.uuid(),
                            });
                        }
                    }
                    Err(e) => errors.record(&e),
                }
            }
            queue.mark_finished();
        });
    }

    pub fn poll_service(&self, block: bool) -> ScanPoll<ServiceRecord> {
        self.services.poll(block)
    }

    /// Enumerate a service's characteristics into the characteristic queue,
    /// each augmented with its user description (or the sentinel).
    pub fn scan_characteristics(&self, device_id: &str, service_id: &str) {
        self.characteristics.reset_finished();
        let resolver = self.resolver.clone();
        let queue = self.characteristics.clone();
        let errors = self.errors.clone();
        let cancel = self.cancel.clone();
        let id = device_id.to_string();
        let service = service_id.to_string();
        self.runtime.spawn(async move {
            if let Some(service) = resolver.resolve_service(&id, &service).await {
                match service.characteristics(CacheMode::Uncached).await {
                    Ok(found) => {
                        for characteristic in found {
                            let description = match characteristic.user_description().await {
                                Ok(Some(text)) => text,
                                Ok(None) => crate::constants::NO_DESCRIPTION.to_string(),
                                Err(e) => {
                                    errors.record(&e);
                                    break;
                                }
                            };
                            if cancel.is_quit() {
                                break;
                            }
                            queue.push(CharacteristicRecord::new(
                                characteristic.uuid(),
                                description,
                            ));
                        }
                    }
                    Err(e) => errors.record(&e),
                }
            }
            queue.mark_finished();
        });
    }

    pub fn poll_characteristic(&self, block: bool) -> ScanPoll<CharacteristicRecord> {
        self.characteristics.poll(block)
    }

    pub fn subscribe_characteristic(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
        block: bool,
    ) -> bool {
        if block {
            return self.runtime.block_on(self.registry.subscribe(
                &self.resolver,
                device_id,
                service_id,
                characteristic_id,
            ));
        }
        let registry = self.registry.clone();
        let resolver = self.resolver.clone();
        let (id, service, characteristic) = (
            device_id.to_string(),
            service_id.to_string(),
            characteristic_id.to_string(),
        );
        self.runtime.spawn(async move {
            registry
                .subscribe(&resolver, &id, &service, &characteristic)
                .await;
        });
        true
    }

    pub fn unsubscribe_characteristic(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
    ) -> bool {
        self.runtime.block_on(self.registry.unsubscribe(
            device_id,
            service_id,
            characteristic_id,
        ))
    }

    /// Next notification payload, if any.
    pub fn poll_data(&self, block: bool) -> Option<BleData> {
        self.data.poll(block).into_option()
    }

    /// Next connection-status transition, if any. Devices auto-subscribe on
    /// first resolution and immediately report their current status.
    pub fn poll_connection(&self, block: bool) -> Option<ConnectionUpdate> {
        self.connections.poll(block).into_option()
    }

    /// Write a payload to a characteristic, without response. Non-blocking
    /// mode spawns the write and reports optimistic success.
    pub fn send_data(&self, data: &BleData, block: bool) -> bool {
        let resolver = self.resolver.clone();
        let errors = self.errors.clone();
        let packet = data.clone();
        let task = async move {
            let service = packet.service_uuid.to_string();
            let characteristic = packet.characteristic_uuid.to_string();
            let Some(handle) = resolver
                .resolve_characteristic(&packet.device_id, &service, &characteristic)
                .await
            else {
                return false;
            };
            match handle.write(&packet.payload).await {
                Ok(()) => {
                    errors.clear();
                    true
                }
                Err(e) => {
                    errors.record(&e);
                    false
                }
            }
        };
        if block {
            self.runtime.block_on(task)
        } else {
            self.runtime.spawn(task);
            true
        }
    }

    /// Global teardown. Sticky until the next [`BleBridge::start_device_scan`]:
    /// sets the quit flag, stops discovery, wakes and drains every queue,
    /// revokes all subscriptions, and evicts the whole cache.
    pub fn quit(&self) {
        info!("quit requested; unwinding scans, queues, subscriptions and cache");
        self.cancel.quit();
        self.scanner.stop();

        self.devices.cancel_wake();
        self.devices.clear();
        self.services.cancel_wake();
        self.services.clear();
        self.characteristics.cancel_wake();
        self.characteristics.clear();

        self.registry.clear();

        self.data.cancel_wake();
        self.data.clear();
        self.connections.cancel_wake();
        self.connections.clear();

        for entry in self.cache.clear_all() {
            if let Some(token) = &entry.status_watch {
                token.cancel();
            }
            // entry drop releases the platform handles
        }
    }

    /// Message recorded by the most recent failing operation, or `"Ok"`.
    pub fn last_error(&self) -> String {
        self.errors.last()
    }
}

impl Drop for BleBridge {
    fn drop(&mut self) {
        self.quit();
    }
}
