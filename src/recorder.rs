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

// Recording session state machine

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::clock::{AppInfo, Clock};
use crate::config::StreamConfig;
use crate::device::{Device, DeviceRegistry};
use crate::log_state::{LogEntry, LogState};
use crate::preferences::PreferenceStore;
use crate::protocol::{LogPayload, SampleRecord, LOG_DATA_TYPE};
use crate::router::SampleRouter;
use crate::storage::{InitializationState, SinkRegistry};
use crate::stream::StreamSource;

/// Snapshot of the current session, replaced on every transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSession {
    pub is_recording: bool,
    pub name: String,
    pub start_time: Option<Instant>,
    /// Wall-clock start, milliseconds since the Unix epoch
    pub started_at_millis: Option<i64>,
}

/// Outcome of [`RecordingOrchestrator::start_recording`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRecordingResult {
    Success,
    EmptyRecordingName,
    AlreadyRecording,
    NoDevicesSelected,
    /// Names of the selected devices that are not connected
    DevicesNotConnected(Vec<String>),
    NoDataSaversEnabled,
    DataSaversNotInitialized,
}

impl StartRecordingResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StartRecordingResult::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicesChangedOutcome {
    NoStateChange,
    Stopped,
    RecordingContinues,
}

/// Collaborators of the orchestrator
pub struct RecorderDeps {
    pub devices: Arc<dyn DeviceRegistry>,
    pub sinks: Arc<SinkRegistry>,
    pub source: Arc<dyn StreamSource>,
    pub log: Arc<LogState>,
    pub prefs: Arc<dyn PreferenceStore>,
    pub clock: Arc<dyn Clock>,
    pub app_info: AppInfo,
    pub stream: StreamConfig,
}

pub struct RecordingOrchestrator {
    devices: Arc<dyn DeviceRegistry>,
    sinks: Arc<SinkRegistry>,
    log: Arc<LogState>,
    prefs: Arc<dyn PreferenceStore>,
    clock: Arc<dyn Clock>,
    app_info: AppInfo,
    router: SampleRouter,
    session: watch::Sender<RecordingSession>,
    // Serializes start, stop and device-set handling
    transition: Mutex<()>,
    // Sequence number of the first log entry not yet persisted
    next_unsaved_log: Mutex<u64>,
}

impl RecordingOrchestrator {
    pub fn new(deps: RecorderDeps) -> Self {
        let router = SampleRouter::new(
            deps.source,
            deps.sinks.clone(),
            deps.devices.clone(),
            deps.log.clone(),
            deps.clock.clone(),
            deps.stream,
        );
        let (session, _) = watch::channel(RecordingSession::default());

        Self {
            devices: deps.devices,
            sinks: deps.sinks,
            log: deps.log,
            prefs: deps.prefs,
            clock: deps.clock,
            app_info: deps.app_info,
            router,
            session,
            transition: Mutex::new(()),
            next_unsaved_log: Mutex::new(0),
        }
    }

    pub fn session(&self) -> RecordingSession {
        self.session.borrow().clone()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<RecordingSession> {
        self.session.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.session.borrow().is_recording
    }

    pub fn router(&self) -> &SampleRouter {
        &self.router
    }

    pub fn sinks(&self) -> &Arc<SinkRegistry> {
        &self.sinks
    }

    /// Validate preconditions and, if they hold, start the session
    pub async fn start_recording(&self, recording_name: &str) -> StartRecordingResult {
        let _transition = self.transition.lock().await;

        if recording_name.is_empty() {
            self.log
                .add_log_error("Recording name cannot be the empty string");
            return StartRecordingResult::EmptyRecordingName;
        }

        if self.is_recording() {
            self.log.add_log_error("Recording already in progress");
            return StartRecordingResult::AlreadyRecording;
        }

        let selected = self.devices.selected_devices();
        if selected.is_empty() {
            self.log
                .add_log_error("Cannot start recording: No devices selected");
            return StartRecordingResult::NoDevicesSelected;
        }

        let connected: HashSet<String> = self
            .devices
            .connected_devices()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        let disconnected: Vec<String> = selected
            .iter()
            .filter(|d| !connected.contains(&d.device_id))
            .map(|d| d.name.clone())
            .collect();
        if !disconnected.is_empty() {
            self.log.add_log_error(format!(
                "Cannot start recording: Some selected devices are not connected: {}",
                disconnected.join(", ")
            ));
            return StartRecordingResult::DevicesNotConnected(disconnected);
        }

        let enabled = self.sinks.enabled();
        if enabled.is_empty() {
            self.log
                .add_log_error("Cannot start recording: No data savers are enabled");
            return StartRecordingResult::NoDataSaversEnabled;
        }

        if enabled
            .iter()
            .any(|sink| sink.initialization_state() != InitializationState::Success)
        {
            self.log.add_log_error(
                "Cannot start recording: Data savers are not initialized. \
                 Please go through the initialization process first.",
            );
            return StartRecordingResult::DataSaversNotInitialized;
        }

        self.router.clear_bookkeeping();
        for device in &selected {
            self.router
                .seed_last_values(&device.device_id, device.data_types.iter().copied());
        }

        self.log_session_diagnostics(&selected);
        self.log.add_log_success(format!(
            "Recording {} started, saving to {} data saver(s)",
            recording_name,
            enabled.len()
        ));

        self.session.send_replace(RecordingSession {
            is_recording: true,
            name: recording_name.to_string(),
            start_time: Some(Instant::now()),
            started_at_millis: Some(self.clock.now_millis()),
        });

        for device in &selected {
            self.router.start_device(&device.device_id, recording_name);
        }

        StartRecordingResult::Success
    }

    pub async fn stop_recording(&self) {
        let _transition = self.transition.lock().await;
        self.stop_locked().await;
    }

    /// Stop with the transition lock already held
    async fn stop_locked(&self) {
        if !self.is_recording() {
            self.log
                .add_log_error("Trying to stop recording while no recording in progress");
            return;
        }

        self.log.add_log_message("Recording stopped");

        // "Recording stopped" must be visible before the final persist
        self.log.flush_queue_sync();
        let entries = self.log.log_messages();
        self.persist_log_entries(&entries).await;

        self.router.dispose_all();
        for sink in self.sinks.enabled() {
            sink.stop_saving().await;
        }

        self.session.send_replace(RecordingSession::default());
        self.router.clear_bookkeeping();
    }

    /// React to a new connected-device snapshot
    ///
    /// Subscriptions of selected devices missing from `current` are disposed.
    /// Only devices that are both present and selected, and have no live
    /// subscription, are restarted; connected but unselected devices are
    /// ignored. With an empty snapshot and `stop_on_disconnect` set the
    /// session is stopped instead.
    pub async fn handle_devices_changed(&self, current: &[Device]) -> DevicesChangedOutcome {
        let _transition = self.transition.lock().await;

        if !self.is_recording() {
            return DevicesChangedOutcome::NoStateChange;
        }

        if current.is_empty() && self.prefs.stop_on_disconnect() {
            self.log
                .add_log_error("No devices connected, stopping recording");
            self.stop_locked().await;
            return DevicesChangedOutcome::Stopped;
        }

        let present: HashSet<&str> = current.iter().map(|d| d.device_id.as_str()).collect();
        let selected = self.devices.selected_devices();

        for device in &selected {
            if !present.contains(device.device_id.as_str()) {
                self.router.dispose_device(&device.device_id);
            }
        }

        let selected_ids: HashSet<&str> = selected.iter().map(|d| d.device_id.as_str()).collect();
        let name = self.session().name;
        for device in current {
            if selected_ids.contains(device.device_id.as_str())
                && !self.router.has_subscriptions(&device.device_id)
            {
                debug!("Restarting streams for reconnected device {}", device.device_id);
                self.router.start_device(&device.device_id, &name);
            }
        }

        DevicesChangedOutcome::RecordingContinues
    }

    /// Persist log entries that have not been persisted yet
    pub async fn handle_log_messages_changed(&self, entries: &[LogEntry]) {
        self.persist_log_entries(entries).await;
    }

    async fn persist_log_entries(&self, entries: &[LogEntry]) {
        let mut next_unsaved = self.next_unsaved_log.lock().await;

        let Some(last) = entries.last() else {
            return;
        };
        if last.seq < *next_unsaved {
            return;
        }

        let session = self.session();
        let selected = self.devices.selected_devices();
        let sinks = self.sinks.enabled();
        if !session.is_recording || selected.is_empty() || sinks.is_empty() {
            return;
        }

        // Local-only entries report failures of this very path
        let pending = entries
            .iter()
            .filter(|e| e.seq >= *next_unsaved && !e.local_only);
        for entry in pending {
            let payload = LogPayload {
                kind: entry.log_type.as_str().to_string(),
                message: entry.message.clone(),
            };
            let data = match serde_json::to_value(&payload) {
                Ok(data) => data,
                Err(e) => {
                    debug!("Skipping log entry {}: {}", entry.seq, e);
                    continue;
                }
            };

            for device in &selected {
                let record = SampleRecord::new(
                    entry.timestamp,
                    &device.device_id,
                    &session.name,
                    LOG_DATA_TYPE,
                    data.clone(),
                );
                for sink in &sinks {
                    sink.save_data(&record).await;
                }
            }
        }

        *next_unsaved = last.seq + 1;
    }

    fn log_session_diagnostics(&self, selected: &[Device]) {
        self.log.add_log_message(format!(
            "App version: {} {}",
            self.app_info.name, self.app_info.version
        ));
        self.log
            .add_log_message(format!("OS version: {}", self.app_info.os));
        self.log.add_log_message(format!(
            "Stream source SDK version: {}",
            self.router.sdk_version()
        ));

        for device in selected {
            self.log
                .add_log_message(format!("Device: {} ({})", device.name, device.device_id));
            for data_type in &device.data_types {
                let settings = device
                    .sensor_settings
                    .get(data_type)
                    .cloned()
                    .unwrap_or_default()
                    .describe();
                self.log
                    .add_log_message(format!("  {}: {}", data_type, settings));
            }
        }
    }

    /// Dispose every subscription (process shutdown)
    pub fn cleanup(&self) {
        self.router.dispose_all();
    }
}
