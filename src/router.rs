// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-(device, data type) stream subscriptions and sink fan-out
//!
//! Every subscription runs in its own task. A subscription re-subscribes to
//! the stream source after an error until its retry budget is spent; after
//! that only the affected (device, data type) pair stops, the rest of the
//! session carries on.
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::batch::{extract_scalar, SampleBatch};
use crate::clock::Clock;
use crate::config::StreamConfig;
use crate::device::{DeviceRegistry, SensorSetting};
use crate::error::StreamError;
use crate::log_state::LogState;
use crate::protocol::{DataType, SampleRecord};
use crate::storage::SinkRegistry;
use crate::stream::StreamSource;

/// Upper bound for the back-off between re-subscriptions
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Handle to one running subscription; dropping it cancels the task
struct Subscription {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The task is not aborted so an in-flight save completes
        let _ = self.cancel.send(true);
    }
}

/// Resolves once the subscription is cancelled or its handle dropped
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// State shared with the subscription tasks
struct Delivery {
    source: Arc<dyn StreamSource>,
    sinks: Arc<SinkRegistry>,
    log: Arc<LogState>,
    clock: Arc<dyn Clock>,
    retry: StreamConfig,
    last_data_timestamps: DashMap<String, i64>,
    last_data: DashMap<String, HashMap<DataType, Option<f32>>>,
}

impl Delivery {
    async fn deliver(
        &self,
        device_id: &str,
        data_type: DataType,
        recording_name: &str,
        batch: SampleBatch,
    ) {
        let timestamp = self.clock.now_millis();
        self.last_data_timestamps
            .insert(device_id.to_string(), timestamp);
        self.last_data
            .entry(device_id.to_string())
            .or_default()
            .insert(data_type, extract_scalar(data_type, &batch));

        let data = match batch.to_json() {
            Ok(data) => data,
            Err(e) => {
                self.log.add_log_error(format!(
                    "Failed to serialize {} batch from {}: {}",
                    data_type, device_id, e
                ));
                return;
            }
        };

        let record = SampleRecord::new(timestamp, device_id, recording_name, data_type.as_str(), data);
        for sink in self.sinks.enabled() {
            sink.save_data(&record).await;
        }
    }

    async fn run(
        self: Arc<Self>,
        device_id: String,
        data_type: DataType,
        settings: SensorSetting,
        recording_name: String,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut retries_left = self.retry.max_retries;
        let mut delay = self.retry.retry_delay();

        loop {
            self.log
                .add_log_message(format!("Starting {} stream for {}", data_type, device_id));

            let started = tokio::select! {
                _ = cancelled(&mut cancel) => return,
                started = self.source.start_stream(&device_id, data_type, &settings) => started,
            };

            let error: StreamError = match started {
                Ok(mut stream) => loop {
                    let next = tokio::select! {
                        _ = cancelled(&mut cancel) => return,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(batch)) => {
                            self.deliver(&device_id, data_type, &recording_name, batch)
                                .await
                        }
                        Some(Err(e)) => break e,
                        None => {
                            self.log.add_log_error(format!(
                                "Stream completed unexpectedly for {} - {}",
                                device_id, data_type
                            ));
                            return;
                        }
                    }
                },
                Err(e) => e,
            };

            self.log.add_log_error(format!(
                "Stream error for {} - {}: {}",
                device_id, data_type, error
            ));

            if retries_left == 0 {
                self.log.add_log_error(format!(
                    "{} recording failed for device {}: {}",
                    data_type, device_id, error
                ));
                return;
            }
            retries_left -= 1;

            tokio::select! {
                _ = cancelled(&mut cancel) => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }
}

/// Owns the live subscriptions of a recording session
pub struct SampleRouter {
    delivery: Arc<Delivery>,
    devices: Arc<dyn DeviceRegistry>,
    subscriptions: DashMap<String, HashMap<DataType, Subscription>>,
}

impl SampleRouter {
    pub fn new(
        source: Arc<dyn StreamSource>,
        sinks: Arc<SinkRegistry>,
        devices: Arc<dyn DeviceRegistry>,
        log: Arc<LogState>,
        clock: Arc<dyn Clock>,
        retry: StreamConfig,
    ) -> Self {
        Self {
            delivery: Arc::new(Delivery {
                source,
                sinks,
                log,
                clock,
                retry,
                last_data_timestamps: DashMap::new(),
                last_data: DashMap::new(),
            }),
            devices,
            subscriptions: DashMap::new(),
        }
    }

    /// Start one subscription per selected data type of `device_id`
    ///
    /// Existing subscriptions for the device are disposed first. Must be
    /// called from within a tokio runtime.
    pub fn start_device(&self, device_id: &str, recording_name: &str) {
        self.dispose_device(device_id);

        let mut subscriptions = HashMap::new();
        for data_type in self.devices.data_types(device_id) {
            let settings = self.devices.sensor_settings(device_id, data_type);
            let (cancel, cancel_rx) = watch::channel(false);
            let handle = tokio::spawn(self.delivery.clone().run(
                device_id.to_string(),
                data_type,
                settings,
                recording_name.to_string(),
                cancel_rx,
            ));
            subscriptions.insert(data_type, Subscription { cancel, handle });
        }

        debug!(
            "Started {} subscription(s) for {}",
            subscriptions.len(),
            device_id
        );
        self.subscriptions
            .insert(device_id.to_string(), subscriptions);
    }

    /// Dispose every subscription of a device; no-op when there is none
    pub fn dispose_device(&self, device_id: &str) {
        if let Some((_, subscriptions)) = self.subscriptions.remove(device_id) {
            debug!(
                "Disposed {} subscription(s) for {}",
                subscriptions.len(),
                device_id
            );
        }
    }

    pub fn dispose_all(&self) {
        self.subscriptions.clear();
    }

    /// Whether the device has a non-empty subscription table entry
    pub fn has_subscriptions(&self, device_id: &str) -> bool {
        self.subscriptions
            .get(device_id)
            .map(|subs| !subs.is_empty())
            .unwrap_or(false)
    }

    pub fn is_subscribed(&self, device_id: &str, data_type: DataType) -> bool {
        self.subscriptions
            .get(device_id)
            .map(|subs| subs.contains_key(&data_type))
            .unwrap_or(false)
    }

    /// Whether the subscription task is still running (not given up)
    pub fn is_active(&self, device_id: &str, data_type: DataType) -> bool {
        self.subscriptions
            .get(device_id)
            .and_then(|subs| subs.get(&data_type).map(|s| s.is_active()))
            .unwrap_or(false)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.iter().map(|e| e.value().len()).sum()
    }

    pub fn subscribed_devices(&self) -> Vec<String> {
        self.subscriptions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear_bookkeeping(&self) {
        self.delivery.last_data_timestamps.clear();
        self.delivery.last_data.clear();
    }

    /// Reset the liveness projection to "no value yet" for each data type
    pub fn seed_last_values(&self, device_id: &str, data_types: impl IntoIterator<Item = DataType>) {
        self.delivery.last_data.insert(
            device_id.to_string(),
            data_types.into_iter().map(|dt| (dt, None)).collect(),
        );
    }

    /// Wall-clock time of the last batch received from a device
    pub fn last_data_timestamp(&self, device_id: &str) -> Option<i64> {
        self.delivery
            .last_data_timestamps
            .get(device_id)
            .map(|ts| *ts)
    }

    /// Last observed scalar per data type, for liveness display
    pub fn last_values(&self, device_id: &str) -> HashMap<DataType, Option<f32>> {
        self.delivery
            .last_data
            .get(device_id)
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    pub fn sdk_version(&self) -> String {
        self.delivery.source.sdk_version()
    }
}
