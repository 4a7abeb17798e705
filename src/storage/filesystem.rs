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

// Filesystem sink writing size-rotated JSON Lines segments
//
// Layout: {base}/{session}/{device name}/{dataType}.jsonl, then
// {dataType}_part{n}.jsonl once a segment is rotated.

use super::backend::{InitializationState, Sink, SinkState};
use crate::config::FileSinkConfig;
use crate::device::DeviceInfoForSink;
use crate::error::{SinkError, SinkResult};
use crate::log_state::LogState;
use crate::preferences::PreferenceStore;
use crate::protocol::{path_component, segment_file_name, stream_key, SampleRecord, LOG_DATA_TYPE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

pub const FILE_SINK_NAME: &str = "filesystem";

/// One rotating output stream for a (device, data type) key
struct Segment {
    key: String,
    dir: PathBuf,
    data_type: String,
    part: u32,
    file: Option<File>,
}

impl Segment {
    async fn open(key: String, dir: PathBuf, data_type: &str) -> std::io::Result<Self> {
        let mut segment = Self {
            key,
            dir,
            data_type: data_type.to_string(),
            part: 1,
            file: None,
        };
        segment.open_current().await?;
        Ok(segment)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(segment_file_name(&self.data_type, self.part))
    }

    async fn open_current(&mut self) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())
            .await?;
        self.file = Some(file);
        Ok(())
    }

    async fn append(&mut self, line: &str) -> SinkResult<()> {
        let file = self.file.as_mut().ok_or_else(|| SinkError::NoSegmentOpen {
            key: self.key.clone(),
        })?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    async fn size(&self) -> std::io::Result<Option<u64>> {
        match &self.file {
            Some(file) => Ok(Some(file.metadata().await?.len())),
            None => Ok(None),
        }
    }

    /// Close the current part and open the next one
    ///
    /// On failure the segment is left without a handle; the part counter has
    /// already advanced so part numbers never repeat.
    async fn rotate(&mut self) -> std::io::Result<String> {
        self.close().await;
        self.part += 1;
        self.open_current().await?;
        Ok(segment_file_name(&self.data_type, self.part))
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                debug!("[{}] Flush on close failed: {}", self.key, e);
            }
        }
    }
}

type SegmentTable = DashMap<String, Arc<Mutex<Segment>>>;

/// Rotate every open segment larger than `threshold` bytes
async fn rotate_segments(segments: &SegmentTable, threshold: u64, log: &LogState) -> usize {
    // Clone the handles out so no map guard is held across an await
    let open: Vec<Arc<Mutex<Segment>>> = segments.iter().map(|e| e.value().clone()).collect();

    let mut rotated = 0;
    for segment in open {
        let mut segment = segment.lock().await;
        let size = match segment.size().await {
            Ok(Some(size)) => size,
            Ok(None) => continue,
            Err(e) => {
                log.add_log_error(format!("[{}] Failed to check file size: {}", segment.key, e));
                continue;
            }
        };

        if size <= threshold {
            continue;
        }

        match segment.rotate().await {
            Ok(name) => {
                rotated += 1;
                log.add_log_message(format!("[{}] Created new file part: {}", segment.key, name));
            }
            Err(e) => {
                log.add_log_error(format!("[{}] Failed to rotate file: {}", segment.key, e));
            }
        }
    }
    rotated
}

/// Sink persisting records as JSON Lines on the local filesystem
pub struct SegmentedFileSink {
    state: SinkState,
    log: Arc<LogState>,
    prefs: Arc<dyn PreferenceStore>,
    config: RwLock<FileSinkConfig>,
    segments: Arc<SegmentTable>,
    rotation_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SegmentedFileSink {
    /// Create the sink with the configuration currently stored in `prefs`
    pub fn new(log: Arc<LogState>, prefs: Arc<dyn PreferenceStore>) -> Self {
        let config = prefs.file_sink_config();
        Self {
            state: SinkState::new(),
            log,
            prefs,
            config: RwLock::new(config),
            segments: Arc::new(DashMap::new()),
            rotation_task: parking_lot::Mutex::new(None),
        }
    }

    /// Replace and persist the configuration; the enabled flag is untouched
    pub fn configure(&self, config: FileSinkConfig) {
        *self.config.write() = config.clone();
        if let Err(e) = self.prefs.set_file_sink_config(config) {
            self.log
                .add_log_error(format!("Failed to save file system settings: {:#}", e));
        }
    }

    pub fn config(&self) -> FileSinkConfig {
        self.config.read().clone()
    }

    /// Number of keys with an open segment
    pub fn open_segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Current part number for a key
    pub async fn current_part(&self, device_id: &str, data_type: &str) -> Option<u32> {
        let segment = self
            .segments
            .get(&stream_key(device_id, data_type))
            .map(|e| e.value().clone())?;
        let part = segment.lock().await.part;
        Some(part)
    }

    /// Run the periodic size check now; returns the number of rotated segments
    pub async fn rotate_oversized(&self) -> usize {
        // Config guard must be released before awaiting segment locks
        let threshold = self.config.read().split_threshold_bytes();
        match threshold {
            Some(threshold) => rotate_segments(&self.segments, threshold, &self.log).await,
            None => 0,
        }
    }

    /// Base directory must exist (created if missing) and accept writes
    async fn check_writable(base: &Path) -> Result<()> {
        if !base.exists() {
            info!("Creating base directory: {}", base.display());
        }
        fs::create_dir_all(base)
            .await
            .with_context(|| format!("Failed to create base directory: {}", base.display()))?;

        let check = base.join(".sensor_recorder_write_check");
        fs::write(&check, b"ok")
            .await
            .with_context(|| format!("Base directory is not writable: {}", base.display()))?;
        fs::remove_file(&check)
            .await
            .context("Failed to remove write check file")?;
        Ok(())
    }

    async fn open_segments(
        &self,
        config: &FileSinkConfig,
        session_name: &str,
        devices: &BTreeMap<String, DeviceInfoForSink>,
    ) -> Result<()> {
        let session_dir = Path::new(config.base_directory.trim()).join(path_component(session_name));
        fs::create_dir_all(&session_dir).await.with_context(|| {
            format!("Failed to create session directory: {}", session_dir.display())
        })?;

        for (device_id, info) in devices {
            let device_dir = session_dir.join(path_component(&info.device_name));
            fs::create_dir_all(&device_dir).await.with_context(|| {
                format!("Failed to create device directory: {}", device_dir.display())
            })?;

            let data_types = info
                .data_types
                .iter()
                .map(|dt| dt.as_str())
                .chain(std::iter::once(LOG_DATA_TYPE));

            for data_type in data_types {
                let key = stream_key(device_id, data_type);
                let segment = Segment::open(key.clone(), device_dir.clone(), data_type)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to create file {}",
                            device_dir.join(segment_file_name(data_type, 1)).display()
                        )
                    })?;
                self.segments.insert(key, Arc::new(Mutex::new(segment)));
            }
        }
        Ok(())
    }

    fn start_rotation_task(&self, config: &FileSinkConfig) {
        let Some(threshold) = config.split_threshold_bytes() else {
            return;
        };

        let period = config.rotation_interval();
        let segments = self.segments.clone();
        let log = self.log.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let rotated = rotate_segments(&segments, threshold, &log).await;
                if rotated > 0 {
                    debug!("Rotation check rotated {} segment(s)", rotated);
                }
            }
        });

        if let Some(previous) = self.rotation_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the rotation task, then flush and drop every segment
    async fn close_all(&self) {
        if let Some(task) = self.rotation_task.lock().take() {
            task.abort();
        }

        let open: Vec<Arc<Mutex<Segment>>> =
            self.segments.iter().map(|e| e.value().clone()).collect();
        self.segments.clear();

        for segment in open {
            segment.lock().await.close().await;
        }
    }
}

#[async_trait]
impl Sink for SegmentedFileSink {
    fn name(&self) -> &str {
        FILE_SINK_NAME
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
        let config = self.config();
        if !config.is_configured() {
            self.log
                .add_log_error("Base directory must be configured before enabling the file system data saver");
            return;
        }

        if let Err(e) = Self::check_writable(Path::new(config.base_directory.trim())).await {
            self.log
                .add_log_error(format!("File system data saver unavailable: {:#}", e));
            return;
        }

        self.state.set_enabled(true);
        if let Err(e) = self.prefs.set_file_sink_enabled(true) {
            self.log
                .add_log_error(format!("Failed to save file system settings: {:#}", e));
        }
        info!("File system data saver enabled at {}", config.base_directory);
    }

    async fn disable(&self) {
        self.state.set_enabled(false);
        if let Err(e) = self.prefs.set_file_sink_enabled(false) {
            self.log
                .add_log_error(format!("Failed to save file system settings: {:#}", e));
        }
        self.close_all().await;
        self.state.reset();
    }

    async fn init_saving(&self, session_name: &str, devices: &BTreeMap<String, DeviceInfoForSink>) {
        self.state.reset_for_session(devices);
        self.close_all().await;

        let config = self.config();
        if !config.is_configured() {
            self.log
                .add_log_error("Base directory must be configured before starting");
            self.state
                .set_initialization_state(InitializationState::Failed);
            return;
        }

        match self.open_segments(&config, session_name, devices).await {
            Ok(()) => {
                self.start_rotation_task(&config);
                self.state
                    .set_initialization_state(InitializationState::Success);
                self.log
                    .add_log_message("File system data saver initialized successfully");
            }
            Err(e) => {
                self.close_all().await;
                self.state
                    .set_initialization_state(InitializationState::Failed);
                self.log.add_log_error(format!(
                    "Failed to initialize file system data saver: {:#}",
                    e
                ));
            }
        }
    }

    async fn save_data(&self, record: &SampleRecord) {
        let key = record.stream_key();

        let Some(segment) = self.segments.get(&key).map(|e| e.value().clone()) else {
            let err = SinkError::NoSegmentOpen { key: key.clone() };
            self.state.report_save_error(
                &self.log,
                record,
                format!("[{}] Failed to save data: {}", key, err),
            );
            return;
        };

        let line = match record.to_json() {
            Ok(line) => line,
            Err(e) => {
                let err = SinkError::from(e);
                self.state.report_save_error(
                    &self.log,
                    record,
                    format!("[{}] Failed to save data: {}", key, err),
                );
                return;
            }
        };

        let mut segment = segment.lock().await;
        match segment.append(&line).await {
            Ok(()) => {
                if self.state.mark_first_saved(&key) {
                    self.log.add_log_message(format!(
                        "[{}] Successfully saved first {} data to filesystem.",
                        record.device_id, record.data_type
                    ));
                }
            }
            Err(err @ SinkError::NoSegmentOpen { .. }) => {
                self.state.report_save_error(
                    &self.log,
                    record,
                    format!("[{}] Failed to save data: {}", key, err),
                );
            }
            Err(err) => {
                // The failed line is dropped; later writes go to the next part
                self.state.report_save_error(
                    &self.log,
                    record,
                    format!("[{}] Failed to save data: {}", key, err),
                );
                let rotated = segment.rotate().await;
                if record.data_type == LOG_DATA_TYPE {
                    debug!("[{}] Emergency rotation: {:?}", key, rotated);
                    return;
                }
                match rotated {
                    Ok(name) => self.log.add_log_message(format!(
                        "[{}] Emergency rotation, created new file part: {}",
                        key, name
                    )),
                    Err(e) => self
                        .log
                        .add_log_error(format!("[{}] Emergency rotation failed: {}", key, e)),
                }
            }
        }
    }

    async fn stop_saving(&self) {
        self.close_all().await;
        self.state.reset();
        debug!("File system data saver stopped");
    }

    async fn cleanup(&self) {
        self.stop_saving().await;
    }

    fn first_message_saved(&self) -> HashMap<String, bool> {
        self.state.first_message_saved()
    }
}

impl Drop for SegmentedFileSink {
    fn drop(&mut self) {
        if let Some(task) = self.rotation_task.lock().take() {
            task.abort();
        }
    }
}
