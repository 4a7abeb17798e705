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

// Network publish sink
//
// Every record is published as the same JSON line the file sink writes, on
// `{topic_prefix}/{dataType}/{deviceId}`.

use super::backend::{InitializationState, Sink, SinkState};
use crate::config::PublishConfig;
use crate::device::DeviceInfoForSink;
use crate::error::SinkError;
use crate::log_state::LogState;
use crate::preferences::PreferenceStore;
use crate::protocol::{publish_topic, SampleRecord};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const PUBLISH_SINK_NAME: &str = "publish";

/// Open connection to a publish endpoint
#[async_trait]
pub trait PublishTransport: Send + Sync {
    /// Publish with at-least-once delivery and no retention
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Factory for publish transports
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        config: &PublishConfig,
        client_id: &str,
    ) -> Result<Arc<dyn PublishTransport>>;
}

/// Connector opening a zenoh session
#[derive(Debug, Default, Clone, Copy)]
pub struct ZenohConnector;

#[async_trait]
impl TransportConnector for ZenohConnector {
    async fn connect(
        &self,
        config: &PublishConfig,
        client_id: &str,
    ) -> Result<Arc<dyn PublishTransport>> {
        let mut zenoh_config = zenoh::Config::default();

        zenoh_config
            .insert_json5("mode", &serde_json::to_string(&config.mode)?)
            .map_err(|e| anyhow::anyhow!("Invalid zenoh mode '{}': {}", config.mode, e))?;

        let endpoints = serde_json::to_string(&[config.endpoint.trim()])?;
        zenoh_config
            .insert_json5("connect/endpoints", &endpoints)
            .map_err(|e| anyhow::anyhow!("Invalid endpoint '{}': {}", config.endpoint, e))?;

        let metadata = serde_json::json!({ "name": client_id }).to_string();
        zenoh_config
            .insert_json5("metadata", &metadata)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let session = zenoh::open(zenoh_config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open Zenoh session: {}", e))?;

        info!(
            "Zenoh session opened to {} as {}",
            config.endpoint, client_id
        );
        Ok(Arc::new(ZenohTransport { session }))
    }
}

pub struct ZenohTransport {
    session: zenoh::Session,
}

#[async_trait]
impl PublishTransport for ZenohTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(topic, payload)
            .congestion_control(zenoh::qos::CongestionControl::Block)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn close(&self) -> Result<()> {
        self.session
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    fn is_connected(&self) -> bool {
        !self.session.is_closed()
    }
}

/// Sink publishing records to a network endpoint
pub struct PublishSink {
    state: SinkState,
    log: Arc<LogState>,
    prefs: Arc<dyn PreferenceStore>,
    config: RwLock<PublishConfig>,
    connector: Arc<dyn TransportConnector>,
    transport: Mutex<Option<Arc<dyn PublishTransport>>>,
}

impl PublishSink {
    pub fn new(
        log: Arc<LogState>,
        prefs: Arc<dyn PreferenceStore>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let config = prefs.publish_config();
        Self {
            state: SinkState::new(),
            log,
            prefs,
            config: RwLock::new(config),
            connector,
            transport: Mutex::new(None),
        }
    }

    /// Replace and persist the configuration; the enabled flag is untouched
    pub fn configure(&self, config: PublishConfig) {
        *self.config.write() = config.clone();
        if let Err(e) = self.prefs.set_publish_config(config) {
            self.log
                .add_log_error(format!("Failed to save publish settings: {:#}", e));
        }
    }

    pub fn config(&self) -> PublishConfig {
        self.config.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    fn client_id(config: &PublishConfig) -> String {
        if config.client_id.trim().is_empty() {
            format!("sensor_recorder_{}", uuid::Uuid::new_v4().simple())
        } else {
            config.client_id.clone()
        }
    }

    async fn disconnect(&self) {
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            match transport.close().await {
                Ok(()) => info!("Disconnected from publish endpoint"),
                Err(e) => warn!("Error closing publish connection: {}", e),
            }
        }
    }
}

#[async_trait]
impl Sink for PublishSink {
    fn name(&self) -> &str {
        PUBLISH_SINK_NAME
    }

    fn is_configured(&self) -> bool {
        self.config.read().is_configured()
    }

    fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    fn initialization_state(&self) -> InitializationState {
        self.state.initialization_state()
    }

    fn subscribe_initialization(&self) -> watch::Receiver<InitializationState> {
        self.state.subscribe_initialization()
    }

    async fn enable(&self) {
        if !self.is_configured() {
            self.log
                .add_log_error("Publish endpoint must be configured before enabling the publish data saver");
            return;
        }

        self.state.set_enabled(true);
        if let Err(e) = self.prefs.set_publish_sink_enabled(true) {
            self.log
                .add_log_error(format!("Failed to save publish settings: {:#}", e));
        }
        info!("Publish data saver enabled for {}", self.config.read().endpoint);
    }

    async fn disable(&self) {
        self.state.set_enabled(false);
        if let Err(e) = self.prefs.set_publish_sink_enabled(false) {
            self.log
                .add_log_error(format!("Failed to save publish settings: {:#}", e));
        }
        self.disconnect().await;
        self.state.reset();
    }

    async fn init_saving(&self, _session_name: &str, devices: &BTreeMap<String, DeviceInfoForSink>) {
        self.state.reset_for_session(devices);

        let config = self.config();
        if !config.is_configured() {
            self.log
                .add_log_error("Publish endpoint must be configured before starting");
            self.state
                .set_initialization_state(InitializationState::Failed);
            return;
        }

        // A new session always gets a fresh connection
        self.disconnect().await;

        let client_id = Self::client_id(&config);
        let connect = self.connector.connect(&config, &client_id);
        let result = match tokio::time::timeout(config.connect_timeout(), connect).await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(e)) => Err(SinkError::Connect(format!("{:#}", e))),
            Err(_) => Err(SinkError::Connect(format!(
                "timed out after {}s",
                config.connect_timeout_seconds
            ))),
        };

        match result {
            Ok(transport) => {
                *self.transport.lock() = Some(transport);
                self.state
                    .set_initialization_state(InitializationState::Success);
                self.log.add_log_message(format!(
                    "Connected to publish endpoint {}",
                    config.endpoint
                ));
            }
            Err(e) => {
                self.state
                    .set_initialization_state(InitializationState::Failed);
                self.log.add_log_error(format!(
                    "Failed to connect to publish endpoint {}: {}",
                    config.endpoint, e
                ));
            }
        }
    }

    async fn save_data(&self, record: &SampleRecord) {
        let key = record.stream_key();

        let Some(transport) = self.transport.lock().clone() else {
            self.state.report_save_error(
                &self.log,
                record,
                format!("[{}] Failed to publish data: {}", key, SinkError::NotInitialized),
            );
            return;
        };

        let payload = match record.to_json() {
            Ok(line) => line.into_bytes(),
            Err(e) => {
                self.state.report_save_error(
                    &self.log,
                    record,
                    format!("[{}] Failed to publish data: {}", key, SinkError::from(e)),
                );
                return;
            }
        };

        let prefix = self.config.read().topic_prefix.clone();
        let topic = publish_topic(&prefix, &record.data_type, &record.device_id);

        match transport.publish(&topic, payload).await {
            Ok(()) => {
                if self.state.mark_first_saved(&key) {
                    self.log.add_log_message(format!(
                        "[{}] Successfully published first {} data to publish endpoint, topic: {}",
                        record.device_id, record.data_type, topic
                    ));
                }
            }
            Err(e) => {
                let err = SinkError::Publish(format!("{:#}", e));
                let message = if transport.is_connected() {
                    format!("[{}] Failed to publish data: {}", key, err)
                } else {
                    format!("[{}] Publish connection lost: {}", key, err)
                };
                self.state.report_save_error(&self.log, record, message);
            }
        }
    }

    async fn stop_saving(&self) {
        // The connection is kept for the next session
        self.state.reset();
        debug!("Publish data saver stopped");
    }

    async fn cleanup(&self) {
        self.stop_saving().await;
        self.disconnect().await;
    }

    fn first_message_saved(&self) -> HashMap<String, bool> {
        self.state.first_message_saved()
    }
}
