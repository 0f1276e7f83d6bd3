//! Production adapter backed by the `bluest` crate.
//!
//! Platform device ids are opaque strings and not every OS can map one back
//! to a device object, so discovered devices are kept in a map keyed by
//! their id string and `open_device` resolves against it, falling back to
//! the set of already-connected devices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device, Service};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::adapter::{
    channel_stream, BleAdapter, CharacteristicHandle, DeviceHandle, DeviceStream, NotifyStream,
    ServiceHandle, StatusStream,
};
use crate::constants::UUID_USER_DESCRIPTION_DESCRIPTOR;
use crate::error::{BleError, BleResult};
use crate::types::{CacheMode, ConnectionStatus, DeviceUpdate, RadioInfo};

const AVAILABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

fn adapter_err(err: bluest::Error) -> BleError {
    match err.kind() {
        bluest::error::ErrorKind::NotAuthorized => BleError::AccessDenied(err.to_string()),
        _ => BleError::AdapterFailure(err.to_string()),
    }
}

pub struct SystemAdapter {
    adapter: Adapter,
    discovered: Arc<Mutex<HashMap<String, Device>>>,
}

impl SystemAdapter {
    pub async fn new() -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            discovered: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl BleAdapter for SystemAdapter {
    async fn radios(&self) -> BleResult<Vec<RadioInfo>> {
        // bluest exposes only the default system radio.
        let powered = self.is_available().await;
        let info = RadioInfo {
            name: "default".to_string(),
            powered,
        };
        info!("---- Bluetooth radio enumeration ----");
        info!("radio {:?} powered={}", info.name, info.powered);
        Ok(vec![info])
    }

    async fn is_available(&self) -> bool {
        matches!(
            timeout(AVAILABILITY_PROBE_TIMEOUT, self.adapter.wait_available()).await,
            Ok(Ok(()))
        )
    }

    async fn start_discovery(&self) -> BleResult<DeviceStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let adapter = self.adapter.clone();
        let discovered = self.discovered.clone();

        // The scan stream borrows the adapter, so it lives inside a task
        // that owns a clone and forwards updates through the channel.
        tokio::spawn(async move {
            let mut scan = match adapter.scan(&[]).await {
                Ok(scan) => {
                    let _ = ready_tx.send(Ok(()));
                    scan
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(adapter_err(e)));
                    return;
                }
            };
            while let Some(adv) = scan.next().await {
                let id = adv.device.id().to_string();
                let name = adv
                    .adv_data
                    .local_name
                    .clone()
                    .or_else(|| adv.device.name().ok());
                debug!("discovered {} rssi={:?}", id, adv.rssi);
                discovered.lock().unwrap().insert(id.clone(), adv.device);
                let update = DeviceUpdate::new(id, name, Some(adv.adv_data.is_connectable));
                if tx.send(update).is_err() {
                    // consumer gone; dropping the scan releases the watcher
                    break;
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| BleError::Unknown("discovery task dropped".to_string()))??;
        Ok(channel_stream(rx))
    }

    async fn open_device(&self, device_id: &str) -> BleResult<Option<Arc<dyn DeviceHandle>>> {
        if let Some(device) = self.discovered.lock().unwrap().get(device_id).cloned() {
            return Ok(Some(self.wrap(device)));
        }

        // Not seen by a scan in this session; it may still be connected at
        // the platform level.
        let connected = self
            .adapter
            .connected_devices()
            .await
            .map_err(adapter_err)?;
        for device in connected {
            if device.id().to_string() == device_id {
                self.discovered
                    .lock()
                    .unwrap()
                    .insert(device_id.to_string(), device.clone());
                return Ok(Some(self.wrap(device)));
            }
        }
        Ok(None)
    }
}

impl SystemAdapter {
    fn wrap(&self, device: Device) -> Arc<dyn DeviceHandle> {
        Arc::new(SystemDevice {
            adapter: self.adapter.clone(),
            device,
        })
    }
}

struct SystemDevice {
    adapter: Adapter,
    device: Device,
}

#[async_trait]
impl DeviceHandle for SystemDevice {
    fn id(&self) -> String {
        self.device.id().to_string()
    }

    async fn connection_status(&self) -> ConnectionStatus {
        if self.device.is_connected().await {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    async fn status_stream(&self) -> BleResult<StatusStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();
        let device = self.device.clone();
        tokio::spawn(async move {
            let mut events = match adapter.device_connection_events(&device).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("connection events unavailable for {}: {e}", device.id());
                    return;
                }
            };
            while let Some(event) = events.next().await {
                let status = match event {
                    ConnectionEvent::Connected => ConnectionStatus::Connected,
                    ConnectionEvent::Disconnected => ConnectionStatus::Disconnected,
                };
                if tx.send(status).is_err() {
                    break;
                }
            }
        });
        Ok(channel_stream(rx))
    }

    async fn connect(&self) -> BleResult<()> {
        if self.device.is_connected().await {
            info!("Device {} already connected.", self.device.id());
            return Ok(());
        }
        info!("Initiating connection to {}...", self.device.id());
        self.adapter
            .connect_device(&self.device)
            .await
            .map_err(adapter_err)
    }

    async fn disconnect(&self) -> BleResult<()> {
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter
                .disconnect_device(&self.device)
                .await
                .map_err(adapter_err)?;
        }
        Ok(())
    }

    async fn services(&self, mode: CacheMode) -> BleResult<Vec<Arc<dyn ServiceHandle>>> {
        let services = match mode {
            CacheMode::Cached => self.device.services().await,
            CacheMode::Uncached => self.device.discover_services().await,
        }
        .map_err(adapter_err)?;
        Ok(services
            .into_iter()
            .map(|service| Arc::new(SystemService { service }) as Arc<dyn ServiceHandle>)
            .collect())
    }

    async fn service_for_uuid(
        &self,
        uuid: Uuid,
        mode: CacheMode,
    ) -> BleResult<Option<Arc<dyn ServiceHandle>>> {
        let services = self.services(mode).await?;
        Ok(services.into_iter().find(|service| service.uuid() == uuid))
    }
}

struct SystemService {
    service: Service,
}

#[async_trait]
impl ServiceHandle for SystemService {
    fn uuid(&self) -> Uuid {
        self.service.uuid()
    }

    async fn characteristics(
        &self,
        mode: CacheMode,
    ) -> BleResult<Vec<Arc<dyn CharacteristicHandle>>> {
        let characteristics = match mode {
            CacheMode::Cached => self.service.characteristics().await,
            CacheMode::Uncached => self.service.discover_characteristics().await,
        }
        .map_err(adapter_err)?;
        Ok(characteristics
            .into_iter()
            .map(|characteristic| {
                Arc::new(SystemCharacteristic { characteristic }) as Arc<dyn CharacteristicHandle>
            })
            .collect())
    }

    async fn characteristic_for_uuid(
        &self,
        uuid: Uuid,
        mode: CacheMode,
    ) -> BleResult<Option<Arc<dyn CharacteristicHandle>>> {
        let characteristics = self.characteristics(mode).await?;
        Ok(characteristics
            .into_iter()
            .find(|characteristic| characteristic.uuid() == uuid))
    }
}

struct SystemCharacteristic {
    characteristic: Characteristic,
}

#[async_trait]
impl CharacteristicHandle for SystemCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid()
    }

    async fn user_description(&self) -> BleResult<Option<String>> {
        let descriptors = self
            .characteristic
            .descriptors()
            .await
            .map_err(adapter_err)?;
        for descriptor in descriptors {
            if descriptor.uuid() == UUID_USER_DESCRIPTION_DESCRIPTOR {
                let raw = descriptor.read().await.map_err(adapter_err)?;
                return Ok(Some(String::from_utf8_lossy(&raw).into_owned()));
            }
        }
        Ok(None)
    }

    async fn subscribe(&self) -> BleResult<NotifyStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let characteristic = self.characteristic.clone();
        tokio::spawn(async move {
            let mut notifications = match characteristic.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    notifications
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(adapter_err(e)));
                    return;
                }
            };
            while let Some(item) = notifications.next().await {
                if tx.send(item.map_err(adapter_err)).is_err() {
                    // subscriber dropped; ending the stream disables notify
                    break;
                }
            }
        });
        ready_rx
            .await
            .map_err(|_| BleError::Unknown("notification task dropped".to_string()))??;
        Ok(channel_stream(rx))
    }

    async fn unsubscribe(&self) -> BleResult<()> {
        // bluest disables notifications when the notify stream is dropped,
        // which happens when the forwarding task above exits.
        Ok(())
    }

    async fn write(&self, payload: &[u8]) -> BleResult<()> {
        self.characteristic
            .write_without_response(payload)
            .await
            .map_err(adapter_err)
    }
}
