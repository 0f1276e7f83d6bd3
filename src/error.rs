//! Error taxonomy and the last-error sink read by the caller after a
//! failed boundary call.

use std::sync::Mutex;

use log::warn;
use thiserror::Error;

/// Result type for adapter and resolution operations.
pub type BleResult<T> = Result<T, BleError>;

/// Value held by the error sink while no operation has failed.
pub const OK_SENTINEL: &str = "Ok";

/// Errors surfaced through the sink. Boundary calls never propagate these;
/// they translate into `false`/not-found returns plus [`ErrorSink`] state.
#[derive(Error, Debug, Clone)]
pub enum BleError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(String),

    #[error("adapter communication failure: {0}")]
    AdapterFailure(String),

    #[error("bluetooth access denied: {0}")]
    AccessDenied(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("{0}")]
    Unknown(String),
}

/// Single last-error slot. Every failing operation overwrites it, every
/// successful one resets it to [`OK_SENTINEL`]. Concurrent failures race on
/// the slot and the last writer wins; that is a documented property of the
/// interface, not something callers should rely on being fixed.
pub struct ErrorSink {
    last: Mutex<String>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(OK_SENTINEL.to_string()),
        }
    }

    /// Reset the slot to the sentinel after a successful operation.
    pub fn clear(&self) {
        *self.last.lock().unwrap() = OK_SENTINEL.to_string();
    }

    /// Record a failure, overwriting whatever was there before.
    pub fn record(&self, err: &BleError) {
        warn!("{err}");
        *self.last.lock().unwrap() = err.to_string();
    }

    /// Current slot contents.
    pub fn last(&self) -> String {
        self.last.lock().unwrap().clone()
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_starts_ok_and_overwrites() {
        let sink = ErrorSink::new();
        assert_eq!(sink.last(), OK_SENTINEL);

        sink.record(&BleError::DeviceUnavailable("dev-1".into()));
        assert_eq!(sink.last(), "device unavailable: dev-1");

        sink.record(&BleError::ServiceNotFound("svc".into()));
        assert_eq!(sink.last(), "service not found: svc");

        sink.clear();
        assert_eq!(sink.last(), OK_SENTINEL);
    }
}
