//! Device discovery: a cancellable forwarding task between the adapter's
//! discovery stream and the device poll queue.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use log::{debug, info};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::adapter::BleAdapter;
use crate::cancel::CancelController;
use crate::error::ErrorSink;
use crate::queue::PollQueue;
use crate::types::DeviceUpdate;

pub struct DeviceScanner {
    adapter: Arc<dyn BleAdapter>,
    queue: Arc<PollQueue<DeviceUpdate>>,
    errors: Arc<ErrorSink>,
    cancel: Arc<CancelController>,
    scan_token: Mutex<Option<CancellationToken>>,
}

impl DeviceScanner {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        queue: Arc<PollQueue<DeviceUpdate>>,
        errors: Arc<ErrorSink>,
        cancel: Arc<CancelController>,
    ) -> Self {
        Self {
            adapter,
            queue,
            errors,
            cancel,
            scan_token: Mutex::new(None),
        }
    }

    /// Start a device scan. `seconds == 0` scans until [`DeviceScanner::stop`]
    /// or global quit; otherwise a timer stops it. Must be called from within
    /// the bridge runtime.
    pub fn start(&self, seconds: u32) {
        // replace any scan already running
        self.stop();
        self.queue.reset_finished();

        let token = self.cancel.child();
        *self.scan_token.lock().unwrap() = Some(token.clone());

        let adapter = self.adapter.clone();
        let queue = self.queue.clone();
        let errors = self.errors.clone();
        let scan_token = token.clone();
        tokio::spawn(async move {
            let mut stream = match adapter.start_discovery().await {
                Ok(stream) => stream,
                Err(e) => {
                    errors.record(&e);
                    queue.mark_finished();
                    return;
                }
            };
            info!("device scan started");
            loop {
                tokio::select! {
                    _ = scan_token.cancelled() => break,
                    update = stream.next() => match update {
                        Some(update) => {
                            debug!("device update: {}", update.id);
                            queue.push(update);
                        }
                        None => {
                            info!("discovery stream ended");
                            queue.mark_finished();
                            break;
                        }
                    },
                }
            }
            // dropping the stream releases the platform watcher
        });

        if seconds > 0 {
            let queue = self.queue.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = sleep(Duration::from_secs(u64::from(seconds))) => {
                        info!("scan duration elapsed, stopping device scan");
                        token.cancel();
                        queue.mark_finished();
                    }
                }
            });
        }
    }

    /// Stop the active scan (if any) and mark the device queue finished.
    pub fn stop(&self) {
        if let Some(token) = self.scan_token.lock().unwrap().take() {
            info!("stopping device scan");
            token.cancel();
        }
        self.queue.mark_finished();
    }
}
