//! The BLE Adapter seam: object-safe traits over the platform stack.
//!
//! Everything radio-facing goes through these traits so the bridge core can
//! run against the real platform ([`system::SystemAdapter`]) or a scripted
//! one ([`mock::MockAdapter`]) in tests. Handles are opaque `Arc`s owned by
//! the resource cache; dropping the last clone releases the platform object.

pub mod mock;
pub mod system;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BleResult;
use crate::types::{CacheMode, ConnectionStatus, DeviceUpdate, RadioInfo};

pub type DeviceStream = Pin<Box<dyn Stream<Item = DeviceUpdate> + Send>>;
pub type StatusStream = Pin<Box<dyn Stream<Item = ConnectionStatus> + Send>>;
pub type NotifyStream = Pin<Box<dyn Stream<Item = BleResult<Vec<u8>>> + Send>>;

/// Entry point to the platform stack.
///
/// Lookup methods return `Ok(None)` for "nothing matched" and `Err` for a
/// communication failure, so the resolution pipeline can map the two onto
/// distinct error-sink messages.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Enumerate BLE-capable radios.
    async fn radios(&self) -> BleResult<Vec<RadioInfo>>;

    /// True if at least one radio is present and powered.
    async fn is_available(&self) -> bool;

    /// Open the device discovery stream. The platform watcher is released
    /// when the stream is dropped.
    async fn start_discovery(&self) -> BleResult<DeviceStream>;

    /// Resolve a device id to a handle.
    async fn open_device(&self, device_id: &str) -> BleResult<Option<Arc<dyn DeviceHandle>>>;
}

#[async_trait]
pub trait DeviceHandle: Send + Sync {
    fn id(&self) -> String;

    async fn connection_status(&self) -> ConnectionStatus;

    /// Stream of connection-status transitions, starting after the call.
    async fn status_stream(&self) -> BleResult<StatusStream>;

    /// Establish (or re-establish) the link.
    async fn connect(&self) -> BleResult<()>;

    /// Tear down the link; best effort.
    async fn disconnect(&self) -> BleResult<()>;

    async fn services(&self, mode: CacheMode) -> BleResult<Vec<Arc<dyn ServiceHandle>>>;

    async fn service_for_uuid(
        &self,
        uuid: Uuid,
        mode: CacheMode,
    ) -> BleResult<Option<Arc<dyn ServiceHandle>>>;
}

#[async_trait]
pub trait ServiceHandle: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn characteristics(&self, mode: CacheMode)
        -> BleResult<Vec<Arc<dyn CharacteristicHandle>>>;

    async fn characteristic_for_uuid(
        &self,
        uuid: Uuid,
        mode: CacheMode,
    ) -> BleResult<Option<Arc<dyn CharacteristicHandle>>>;
}

#[async_trait]
pub trait CharacteristicHandle: Send + Sync {
    fn uuid(&self) -> Uuid;

    /// User description from the 0x2901 descriptor, if the characteristic
    /// carries one.
    async fn user_description(&self) -> BleResult<Option<String>>;

    /// Enable notifications. Items arrive until the stream is dropped.
    async fn subscribe(&self) -> BleResult<NotifyStream>;

    /// Disable notifications. May fail; the registry restores the
    /// subscription in that case.
    async fn unsubscribe(&self) -> BleResult<()>;

    /// Write without response.
    async fn write(&self, payload: &[u8]) -> BleResult<()>;
}

/// Adapt an mpsc receiver into a boxed stream. Platform event streams borrow
/// the adapter, so the system implementation forwards them through a channel
/// from an owning task to get a `'static` stream.
pub(crate) fn channel_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<T>,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}
