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

// Long-running recording service
//
// Wires the observable device and log state into the orchestrator:
// - connected-device changes -> handle_devices_changed
// - log list changes -> handle_log_messages_changed
// - flush requests -> LogState::flush_queue_sync

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::device::{Device, DeviceState};
use crate::log_state::{LogEntry, LogState};
use crate::recorder::{DevicesChangedOutcome, RecordingOrchestrator};

pub struct RecordingService {
    orchestrator: Arc<RecordingOrchestrator>,
    log: Arc<LogState>,
    tasks: Vec<JoinHandle<()>>,
}

impl RecordingService {
    /// Spawn the observer tasks; must be called from within a tokio runtime
    pub fn start(
        orchestrator: Arc<RecordingOrchestrator>,
        devices: &DeviceState,
        log: Arc<LogState>,
    ) -> Self {
        let tasks = vec![
            tokio::spawn(Self::observe_devices(
                orchestrator.clone(),
                devices.subscribe_connected(),
            )),
            tokio::spawn(Self::observe_logs(orchestrator.clone(), log.subscribe())),
            tokio::spawn(Self::flush_logs(log.clone())),
        ];

        info!("Recording service started");
        Self {
            orchestrator,
            log,
            tasks,
        }
    }

    pub fn orchestrator(&self) -> &Arc<RecordingOrchestrator> {
        &self.orchestrator
    }

    async fn observe_devices(
        orchestrator: Arc<RecordingOrchestrator>,
        mut connected: watch::Receiver<Vec<Device>>,
    ) {
        while connected.changed().await.is_ok() {
            let current = connected.borrow_and_update().clone();
            let outcome = orchestrator.handle_devices_changed(&current).await;
            if outcome == DevicesChangedOutcome::Stopped {
                info!("Recording stopped after all devices disconnected");
            } else {
                debug!(
                    "Device set changed ({} connected): {:?}",
                    current.len(),
                    outcome
                );
            }
        }
    }

    async fn observe_logs(
        orchestrator: Arc<RecordingOrchestrator>,
        mut entries: watch::Receiver<Arc<Vec<LogEntry>>>,
    ) {
        while entries.changed().await.is_ok() {
            let snapshot = entries.borrow_and_update().clone();
            orchestrator.handle_log_messages_changed(&snapshot).await;
        }
    }

    async fn flush_logs(log: Arc<LogState>) {
        loop {
            log.flush_requested().await;
            log.flush_queue_sync();
        }
    }

    /// Stop an active recording, end the observers and release every sink
    pub async fn shutdown(self) {
        if self.orchestrator.is_recording() {
            self.orchestrator.stop_recording().await;
        }

        for task in &self.tasks {
            task.abort();
        }
        self.log.flush_queue_sync();

        self.orchestrator.cleanup();
        self.orchestrator.sinks().cleanup_all().await;
        info!("Recording service shut down");
    }
}
