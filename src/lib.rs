//! BLE poll bridge library
//! Exposes BLE scanning, GATT discovery, notification subscriptions and
//! writes through a synchronous poll-based facade suitable for embedding
//! in hosts without an async runtime of their own.

pub mod adapter;
pub mod bridge;
pub mod cache;
pub mod cancel;
pub mod constants;
pub mod error;
pub mod queue;
pub mod resolver;
pub mod scanner;
pub mod subscription;
pub mod types;

pub use adapter::mock::MockAdapter;
pub use adapter::system::SystemAdapter;
pub use adapter::{BleAdapter, CharacteristicHandle, DeviceHandle, ServiceHandle};
pub use bridge::BleBridge;
pub use error::{BleError, BleResult, OK_SENTINEL};
pub use types::{
    BleData, CharacteristicRecord, ConnectionStatus, ConnectionUpdate, DeviceUpdate, RadioInfo,
    ScanPoll, ServiceRecord,
};

/// Initialize logging from `RUST_LOG`. Safe to call more than once.
pub fn init_logging() {
    if env_logger::try_init().is_ok() {
        log::info!("Logging initialized");
    }
}
