//! Notification subscriptions: registry, forwarding tasks, revocation.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapter::CharacteristicHandle;
use crate::cancel::CancelController;
use crate::error::{BleError, ErrorSink};
use crate::queue::PollQueue;
use crate::resolver::{parse_id, ResolutionPipeline};
use crate::types::BleData;

struct Subscription {
    device_id: String,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    handle: Arc<dyn CharacteristicHandle>,
    /// Cancels the forwarding task, which drops the notify stream.
    revoker: CancellationToken,
}

pub struct SubscriptionRegistry {
    subs: Mutex<Vec<Subscription>>,
    data: Arc<PollQueue<BleData>>,
    errors: Arc<ErrorSink>,
    cancel: Arc<CancelController>,
}

impl SubscriptionRegistry {
    pub fn new(
        data: Arc<PollQueue<BleData>>,
        errors: Arc<ErrorSink>,
        cancel: Arc<CancelController>,
    ) -> Self {
        Self {
            subs: Mutex::new(Vec::new()),
            data,
            errors,
            cancel,
        }
    }

    /// Resolve the characteristic, enable notifications, and start the task
    /// forwarding payloads into the shared data queue. Failure at any step
    /// leaves no registry entry.
    pub async fn subscribe(
        &self,
        resolver: &ResolutionPipeline,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
    ) -> bool {
        let (service_uuid, characteristic_uuid) =
            match (parse_id(service_id), parse_id(characteristic_id)) {
                (Ok(s), Ok(c)) => (s, c),
                (Err(e), _) | (_, Err(e)) => {
                    self.errors.record(&e);
                    return false;
                }
            };

        let Some(handle) = resolver
            .resolve_characteristic(device_id, service_id, characteristic_id)
            .await
        else {
            return false;
        };

        let stream = match handle.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                self.errors.record(&e);
                return false;
            }
        };

        let revoker = self.cancel.child();
        let token = revoker.clone();
        let data = self.data.clone();
        let owner = device_id.to_string();
        tokio::spawn(async move {
            let mut stream = stream;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(payload)) => data.push(BleData::new(
                            &owner,
                            service_uuid,
                            characteristic_uuid,
                            &payload,
                        )),
                        Some(Err(e)) => {
                            warn!("notification stream error: {e}");
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        self.subs.lock().unwrap().push(Subscription {
            device_id: device_id.to_string(),
            service_uuid,
            characteristic_uuid,
            handle,
            revoker,
        });
        info!("subscribed to {characteristic_id} on {device_id}");
        self.errors.clear();
        true
    }

    /// Remove by exact identity (device id plus parsed UUIDs, not by hash)
    /// and disable notifications. If the adapter disable call fails, the
    /// subscription is restored and stays active; unsubscribe can be retried.
    pub async fn unsubscribe(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
    ) -> bool {
        let (service_uuid, characteristic_uuid) =
            match (parse_id(service_id), parse_id(characteristic_id)) {
                (Ok(s), Ok(c)) => (s, c),
                (Err(e), _) | (_, Err(e)) => {
                    self.errors.record(&e);
                    return false;
                }
            };

        let entry = {
            let mut subs = self.subs.lock().unwrap();
            let position = subs.iter().position(|sub| {
                sub.device_id == device_id
                    && sub.service_uuid == service_uuid
                    && sub.characteristic_uuid == characteristic_uuid
            });
            match position {
                Some(idx) => subs.remove(idx),
                None => {
                    self.errors.record(&BleError::Unknown(format!(
                        "no active subscription for {characteristic_id} on {device_id}"
                    )));
                    return false;
                }
            }
        };

        match entry.handle.unsubscribe().await {
            Ok(()) => {
                entry.revoker.cancel();
                info!("unsubscribed from {characteristic_id} on {device_id}");
                self.errors.clear();
                true
            }
            Err(e) => {
                self.errors.record(&e);
                self.subs.lock().unwrap().push(entry);
                false
            }
        }
    }

    /// Drop every subscription belonging to a device, without the adapter
    /// disable call; the device link itself is being torn down.
    pub fn remove_device(&self, device_id: &str) {
        let mut subs = self.subs.lock().unwrap();
        subs.retain(|sub| {
            if sub.device_id == device_id {
                sub.revoker.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Drop all subscriptions; used by global teardown.
    pub fn clear(&self) {
        let mut subs = self.subs.lock().unwrap();
        for sub in subs.drain(..) {
            sub.revoker.cancel();
        }
    }
}
