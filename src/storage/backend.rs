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

// Sink trait for write-only session persistence

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

use crate::device::DeviceInfoForSink;
use crate::log_state::LogState;
use crate::protocol::{stream_key, SampleRecord, LOG_DATA_TYPE};

/// Readiness of a sink for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationState {
    NotStarted,
    Success,
    Failed,
}

/// Persistence endpoint fed by the sample router
///
/// Sinks never return errors to the caller. Every failure is turned into a
/// diagnostic log entry and, where it matters, a state flag.
///
/// Variant-specific configuration is applied through each sink's own
/// `configure` method since its shape differs per sink.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable identifier, e.g. `filesystem`
    fn name(&self) -> &str;

    /// Whether the required configuration field is set
    fn is_configured(&self) -> bool;

    fn is_enabled(&self) -> bool;

    fn initialization_state(&self) -> InitializationState;

    /// Watch initialization state changes
    fn subscribe_initialization(&self) -> watch::Receiver<InitializationState>;

    /// Enable the sink and persist the flag
    ///
    /// Does nothing but log an error when the sink is not configured or its
    /// availability check fails.
    async fn enable(&self);

    /// Disable the sink, persist the flag and release held resources
    async fn disable(&self);

    /// Prepare per-device, per-data-type outputs for a session
    ///
    /// Safe to call again without a `stop_saving` in between.
    ///
    /// # Arguments
    /// * `session_name` - Recording name used for paths and records
    /// * `devices` - Selected devices keyed by device id
    async fn init_saving(&self, session_name: &str, devices: &BTreeMap<String, DeviceInfoForSink>);

    /// Best-effort persist of one record
    async fn save_data(&self, record: &SampleRecord);

    /// Release per-session resources
    async fn stop_saving(&self);

    /// `stop_saving` plus release of process-lifetime resources
    async fn cleanup(&self);

    /// Snapshot of `"{deviceId}/{dataType}"` → first record persisted
    fn first_message_saved(&self) -> HashMap<String, bool>;
}

/// State shared by every sink variant
pub struct SinkState {
    enabled: AtomicBool,
    initialized: watch::Sender<InitializationState>,
    first_message_saved: DashMap<String, bool>,
    // Keys whose LOG save failure was already reported this session
    log_failures_reported: DashSet<String>,
}

impl Default for SinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkState {
    pub fn new() -> Self {
        let (initialized, _) = watch::channel(InitializationState::NotStarted);
        Self {
            enabled: AtomicBool::new(false),
            initialized,
            first_message_saved: DashMap::new(),
            log_failures_reported: DashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn initialization_state(&self) -> InitializationState {
        *self.initialized.borrow()
    }

    pub fn set_initialization_state(&self, state: InitializationState) {
        self.initialized.send_replace(state);
    }

    pub fn subscribe_initialization(&self) -> watch::Receiver<InitializationState> {
        self.initialized.subscribe()
    }

    /// Reset for a new session: one `false` per (device, data type) plus `LOG`
    pub fn reset_for_session(&self, devices: &BTreeMap<String, DeviceInfoForSink>) {
        self.reset();
        for (device_id, info) in devices {
            for data_type in info.data_types.iter() {
                self.first_message_saved
                    .insert(stream_key(device_id, data_type.as_str()), false);
            }
            self.first_message_saved
                .insert(stream_key(device_id, LOG_DATA_TYPE), false);
        }
    }

    /// Flip the key to saved; `true` only on the first call for that key
    pub fn mark_first_saved(&self, key: &str) -> bool {
        let mut saved = self.first_message_saved.entry(key.to_string()).or_insert(false);
        if *saved {
            false
        } else {
            *saved = true;
            true
        }
    }

    pub fn reset(&self) {
        self.set_initialization_state(InitializationState::NotStarted);
        self.first_message_saved.clear();
        self.log_failures_reported.clear();
    }

    /// Log a failed `save_data`
    ///
    /// Sensor records get one error entry per failure. `LOG` records get a
    /// single local-only entry per key and session, the rest go to tracing.
    pub fn report_save_error(&self, log: &LogState, record: &SampleRecord, message: String) {
        if record.data_type != LOG_DATA_TYPE {
            log.add_log_error(message);
        } else if self.log_failures_reported.insert(record.stream_key()) {
            log.add_local_error(message);
        } else {
            debug!("{}", message);
        }
    }

    pub fn first_message_saved(&self) -> HashMap<String, bool> {
        self.first_message_saved
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
