//! Scripted adapter for tests.
//!
//! Allows configuring a device/service/characteristic tree, injecting
//! advertisements, notifications and connection-status events, and toggling
//! failures, without requiring actual hardware. Call counters expose how
//! often the bridge reached for the adapter, so caching behavior can be
//! asserted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::adapter::{
    channel_stream, BleAdapter, CharacteristicHandle, DeviceHandle, DeviceStream, NotifyStream,
    ServiceHandle, StatusStream,
};
use crate::error::{BleError, BleResult};
use crate::types::{CacheMode, ConnectionStatus, DeviceUpdate, RadioInfo};

struct Flags {
    subscribe_fails: AtomicBool,
    unsubscribe_fails: AtomicBool,
}

struct State {
    devices: HashMap<String, Arc<MockDevice>>,
    advert_tx: UnboundedSender<DeviceUpdate>,
    advert_rx: Option<UnboundedReceiver<DeviceUpdate>>,
    open_counts: HashMap<String, usize>,
}

#[derive(Clone)]
pub struct MockAdapter {
    available: Arc<AtomicBool>,
    flags: Arc<Flags>,
    state: Arc<Mutex<State>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        let (advert_tx, advert_rx) = mpsc::unbounded_channel();
        Self {
            available: Arc::new(AtomicBool::new(true)),
            flags: Arc::new(Flags {
                subscribe_fails: AtomicBool::new(false),
                unsubscribe_fails: AtomicBool::new(false),
            }),
            state: Arc::new(Mutex::new(State {
                devices: HashMap::new(),
                advert_tx,
                advert_rx: Some(advert_rx),
                open_counts: HashMap::new(),
            })),
        }
    }

    pub fn add_device(&self, id: &str) {
        let device = Arc::new(MockDevice {
            id: id.to_string(),
            status: Mutex::new(ConnectionStatus::Disconnected),
            status_txs: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
        });
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(id.to_string(), device);
    }

    pub fn add_service(&self, device_id: &str, uuid: Uuid) {
        let device = self.device(device_id).expect("unknown mock device");
        device.services.lock().unwrap().push(Arc::new(MockService {
            uuid,
            characteristics: Mutex::new(Vec::new()),
        }));
    }

    pub fn add_characteristic(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        description: Option<&str>,
    ) {
        let device = self.device(device_id).expect("unknown mock device");
        let services = device.services.lock().unwrap();
        let service = services
            .iter()
            .find(|s| s.uuid == service)
            .expect("unknown mock service");
        service
            .characteristics
            .lock()
            .unwrap()
            .push(Arc::new(MockCharacteristic {
                uuid: characteristic,
                description: description.map(str::to_string),
                flags: self.flags.clone(),
                notify_txs: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
            }));
    }

    /// Inject a discovery event into the active (or next) scan stream.
    pub fn advertise(&self, update: DeviceUpdate) {
        let _ = self.state.lock().unwrap().advert_tx.send(update);
    }

    /// Change a device's connection status and broadcast the transition.
    pub fn set_connection_status(&self, device_id: &str, status: ConnectionStatus) {
        if let Some(device) = self.device(device_id) {
            device.set_status(status);
        }
    }

    /// Deliver a notification payload to every active subscriber of the
    /// characteristic. Returns true if anyone received it.
    pub fn notify(&self, device_id: &str, service: Uuid, characteristic: Uuid, payload: &[u8]) -> bool {
        let Some(chr) = self.characteristic(device_id, service, characteristic) else {
            return false;
        };
        let mut txs = chr.notify_txs.lock().unwrap();
        txs.retain(|tx| tx.send(Ok(payload.to_vec())).is_ok());
        !txs.is_empty()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fails: bool) {
        self.flags.subscribe_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_unsubscribe_failure(&self, fails: bool) {
        self.flags.unsubscribe_fails.store(fails, Ordering::SeqCst);
    }

    /// How often `open_device` was called for the id.
    pub fn open_count(&self, device_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .open_counts
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    /// Payloads written to the characteristic, oldest first.
    pub fn written(&self, device_id: &str, service: Uuid, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.characteristic(device_id, service, characteristic)
            .map(|chr| chr.written.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Handle lookup for tests exercising the cache directly.
    pub fn service_handle(&self, device_id: &str, uuid: Uuid) -> Option<Arc<dyn ServiceHandle>> {
        let device = self.device(device_id)?;
        let services = device.services.lock().unwrap();
        services
            .iter()
            .find(|s| s.uuid == uuid)
            .map(|s| s.clone() as Arc<dyn ServiceHandle>)
    }

    fn device(&self, id: &str) -> Option<Arc<MockDevice>> {
        self.state.lock().unwrap().devices.get(id).cloned()
    }

    fn characteristic(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<Arc<MockCharacteristic>> {
        let device = self.device(device_id)?;
        let services = device.services.lock().unwrap();
        let service = services.iter().find(|s| s.uuid == service)?;
        let characteristics = service.characteristics.lock().unwrap();
        characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn radios(&self) -> BleResult<Vec<RadioInfo>> {
        Ok(vec![RadioInfo {
            name: "mock".to_string(),
            powered: self.available.load(Ordering::SeqCst),
        }])
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn start_discovery(&self) -> BleResult<DeviceStream> {
        let mut state = self.state.lock().unwrap();
        let rx = match state.advert_rx.take() {
            Some(rx) => rx,
            None => {
                // a previous scan consumed the receiver; start a fresh pair
                let (tx, rx) = mpsc::unbounded_channel();
                state.advert_tx = tx;
                rx
            }
        };
        Ok(channel_stream(rx))
    }

    async fn open_device(&self, device_id: &str) -> BleResult<Option<Arc<dyn DeviceHandle>>> {
        let mut state = self.state.lock().unwrap();
        *state.open_counts.entry(device_id.to_string()).or_insert(0) += 1;
        Ok(state
            .devices
            .get(device_id)
            .cloned()
            .map(|device| device as Arc<dyn DeviceHandle>))
    }
}

struct MockDevice {
    id: String,
    status: Mutex<ConnectionStatus>,
    status_txs: Mutex<Vec<UnboundedSender<ConnectionStatus>>>,
    services: Mutex<Vec<Arc<MockService>>>,
}

impl MockDevice {
    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap() = status;
        let mut txs = self.status_txs.lock().unwrap();
        txs.retain(|tx| tx.send(status).is_ok());
    }
}

#[async_trait]
impl DeviceHandle for MockDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connection_status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    async fn status_stream(&self) -> BleResult<StatusStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.status_txs.lock().unwrap().push(tx);
        Ok(channel_stream(rx))
    }

    async fn connect(&self) -> BleResult<()> {
        self.set_status(ConnectionStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> BleResult<()> {
        self.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn services(&self, _mode: CacheMode) -> BleResult<Vec<Arc<dyn ServiceHandle>>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .map(|service| service.clone() as Arc<dyn ServiceHandle>)
            .collect())
    }

    async fn service_for_uuid(
        &self,
        uuid: Uuid,
        _mode: CacheMode,
    ) -> BleResult<Option<Arc<dyn ServiceHandle>>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .find(|service| service.uuid == uuid)
            .map(|service| service.clone() as Arc<dyn ServiceHandle>))
    }
}

struct MockService {
    uuid: Uuid,
    characteristics: Mutex<Vec<Arc<MockCharacteristic>>>,
}

#[async_trait]
impl ServiceHandle for MockService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn characteristics(
        &self,
        _mode: CacheMode,
    ) -> BleResult<Vec<Arc<dyn CharacteristicHandle>>> {
        Ok(self
            .characteristics
            .lock()
            .unwrap()
            .iter()
            .map(|chr| chr.clone() as Arc<dyn CharacteristicHandle>)
            .collect())
    }

    async fn characteristic_for_uuid(
        &self,
        uuid: Uuid,
        _mode: CacheMode,
    ) -> BleResult<Option<Arc<dyn CharacteristicHandle>>> {
        Ok(self
            .characteristics
            .lock()
            .unwrap()
            .iter()
            .find(|chr| chr.uuid == uuid)
            .map(|chr| chr.clone() as Arc<dyn CharacteristicHandle>))
    }
}

struct MockCharacteristic {
    uuid: Uuid,
    description: Option<String>,
    flags: Arc<Flags>,
    notify_txs: Mutex<Vec<UnboundedSender<BleResult<Vec<u8>>>>>,
    written: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl CharacteristicHandle for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn user_description(&self) -> BleResult<Option<String>> {
        Ok(self.description.clone())
    }

    async fn subscribe(&self) -> BleResult<NotifyStream> {
        if self.flags.subscribe_fails.load(Ordering::SeqCst) {
            return Err(BleError::AdapterFailure(
                "mock notify enable failure".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify_txs.lock().unwrap().push(tx);
        Ok(channel_stream(rx))
    }

    async fn unsubscribe(&self) -> BleResult<()> {
        if self.flags.unsubscribe_fails.load(Ordering::SeqCst) {
            return Err(BleError::AdapterFailure(
                "mock notify disable failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn write(&self, payload: &[u8]) -> BleResult<()> {
        self.written.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}
