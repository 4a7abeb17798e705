// Recording orchestrator scenario tests

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use sensor_recorder::batch::HrSample;
use sensor_recorder::config::{Preferences, PublishConfig, StreamConfig};
use sensor_recorder::storage::{PublishTransport, TransportConnector};
use sensor_recorder::{
    AppInfo, ConnectionState, DataType, DeviceInfoForSink, DeviceRegistry, DeviceState,
    DevicesChangedOutcome, InitializationState, LogState, PreferenceStore, RecorderDeps,
    RecordingOrchestrator, RecordingService, SampleBatch, SensorSetting, Sink, SinkRegistry, StartRecordingResult,
    StreamError, StreamSource, SystemClock, YamlPreferenceStore,
};
use sensor_recorder::stream::BatchStream;

/// Publish transport keeping every message in memory
#[derive(Default)]
struct MemoryTransport {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    fail: AtomicBool,
}

#[async_trait]
impl PublishTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("broker unreachable");
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct MemoryConnector(Arc<MemoryTransport>);

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(
        &self,
        _config: &PublishConfig,
        _client_id: &str,
    ) -> Result<Arc<dyn PublishTransport>> {
        Ok(self.0.clone() as Arc<dyn PublishTransport>)
    }
}

/// Emits one HR batch per subscription, then stays open
#[derive(Default)]
struct OneBatchSource {
    starts: AtomicUsize,
}

#[async_trait]
impl StreamSource for OneBatchSource {
    async fn start_stream(
        &self,
        _device_id: &str,
        _data_type: DataType,
        _settings: &SensorSetting,
    ) -> Result<BatchStream, StreamError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let batch = SampleBatch::Hr(vec![HrSample {
            hr: 64,
            rrs_ms: vec![930],
            rr_available: true,
            contact_status: true,
            contact_status_supported: true,
        }]);
        Ok(futures::stream::iter(vec![Ok(batch)])
            .chain(futures::stream::pending())
            .boxed())
    }

    fn sdk_version(&self) -> String {
        "test-sdk 1.0".to_string()
    }
}

struct Harness {
    _temp_dir: TempDir,
    base: PathBuf,
    devices: Arc<DeviceState>,
    log: Arc<LogState>,
    sinks: Arc<SinkRegistry>,
    source: Arc<OneBatchSource>,
    transport: Arc<MemoryTransport>,
    orchestrator: Arc<RecordingOrchestrator>,
}

impl Harness {
    async fn new(file_enabled: bool, publish_enabled: bool, stop_on_disconnect: bool) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().to_path_buf();

        let mut prefs = Preferences::default();
        prefs.file_sink.base_directory = base.to_string_lossy().to_string();
        prefs.file_sink.split_at_size_mb = 0;
        prefs.file_sink_enabled = file_enabled;
        prefs.publish_sink.endpoint = "tcp/127.0.0.1:7447".to_string();
        prefs.publish_sink_enabled = publish_enabled;
        prefs.session.stop_on_disconnect = stop_on_disconnect;
        let prefs: Arc<dyn PreferenceStore> = Arc::new(YamlPreferenceStore::in_memory(prefs));

        let log = Arc::new(LogState::new());
        let transport = Arc::new(MemoryTransport::default());
        let sinks = Arc::new(
            SinkRegistry::new(
                log.clone(),
                prefs.clone(),
                Arc::new(MemoryConnector(transport.clone())),
            )
            .await,
        );

        let devices = Arc::new(DeviceState::new());
        let source = Arc::new(OneBatchSource::default());

        let orchestrator = Arc::new(RecordingOrchestrator::new(RecorderDeps {
            devices: devices.clone(),
            sinks: sinks.clone(),
            source: source.clone(),
            log: log.clone(),
            prefs,
            clock: Arc::new(SystemClock),
            app_info: AppInfo::default(),
            stream: StreamConfig {
                max_retries: 3,
                retry_delay_ms: 1,
            },
        }));

        Self {
            _temp_dir: temp_dir,
            base,
            devices,
            log,
            sinks,
            source,
            transport,
            orchestrator,
        }
    }

    fn add_device(&self, id: &str, name: &str, connected: bool) {
        self.devices.add_device(id, name, true);
        self.devices
            .set_data_types(id, [DataType::Hr].into_iter().collect());
        self.devices.set_selected(id, true);
        if connected {
            self.devices
                .update_connection_state(id, ConnectionState::Connected);
        }
    }

    fn sink_devices(&self) -> BTreeMap<String, DeviceInfoForSink> {
        DeviceInfoForSink::from_devices(&self.devices.selected_devices())
    }

    async fn initialize_sinks(&self, name: &str) {
        let results = self.sinks.initialize_enabled(name, &self.sink_devices()).await;
        assert!(results
            .iter()
            .all(|(_, state)| *state == InitializationState::Success));
    }

    fn logged(&self, needle: &str) -> bool {
        self.log.flush_queue_sync();
        self.log
            .log_messages()
            .iter()
            .any(|e| e.message.contains(needle))
    }
}

fn last_seq(log: &LogState) -> Option<u64> {
    log.flush_queue_sync();
    log.log_messages().last().map(|e| e.seq)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_empty_name_never_starts() {
    let h = Harness::new(true, false, false).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;

    let result = h.orchestrator.start_recording("").await;

    assert_eq!(result, StartRecordingResult::EmptyRecordingName);
    assert!(!h.orchestrator.is_recording());
    assert_eq!(h.orchestrator.router().subscription_count(), 0);
    assert_eq!(h.source.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_devices_selected() {
    let h = Harness::new(true, false, false).await;

    let result = h.orchestrator.start_recording("Run1").await;
    assert_eq!(result, StartRecordingResult::NoDevicesSelected);
}

#[tokio::test]
async fn test_disconnected_devices_are_listed_in_order() {
    let h = Harness::new(true, false, false).await;
    h.add_device("dev1", "Strap", true);
    h.add_device("dev2", "Watch", false);
    h.add_device("dev3", "Ring", false);

    let result = h.orchestrator.start_recording("Run1").await;

    assert_eq!(
        result,
        StartRecordingResult::DevicesNotConnected(vec!["Watch".to_string(), "Ring".to_string()])
    );
    assert!(h.logged("Some selected devices are not connected: Watch, Ring"));
    assert_eq!(h.orchestrator.router().subscription_count(), 0);
}

#[tokio::test]
async fn test_no_data_savers_enabled() {
    let h = Harness::new(false, false, false).await;
    h.add_device("dev1", "Strap", true);

    let result = h.orchestrator.start_recording("Run1").await;
    assert_eq!(result, StartRecordingResult::NoDataSaversEnabled);
}

#[tokio::test]
async fn test_uninitialized_sink_blocks_start() {
    let h = Harness::new(true, true, false).await;
    h.add_device("dev1", "Strap", true);

    // Only the file sink goes through initialization
    h.sinks
        .file_sink()
        .init_saving("Run1", &h.sink_devices())
        .await;

    let result = h.orchestrator.start_recording("Run1").await;

    assert_eq!(result, StartRecordingResult::DataSaversNotInitialized);
    assert!(!h.orchestrator.is_recording());
    assert_eq!(h.orchestrator.router().subscription_count(), 0);
}

#[tokio::test]
async fn test_start_with_file_and_publish_sinks() {
    let h = Harness::new(true, true, false).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;

    let result = h.orchestrator.start_recording("Run1").await;

    assert_eq!(result, StartRecordingResult::Success);
    let session = h.orchestrator.session();
    assert!(session.is_recording);
    assert_eq!(session.name, "Run1");
    assert!(session.start_time.is_some());

    let router = h.orchestrator.router();
    assert_eq!(router.subscription_count(), 1);
    assert!(router.is_subscribed("dev1", DataType::Hr));

    assert!(h.logged("Recording Run1 started, saving to 2 data saver(s)"));
    assert!(h.logged("Stream source SDK version: test-sdk 1.0"));
    assert!(h.logged("Device: Strap (dev1)"));

    // The batch reaches both sinks
    wait_for(|| !h.transport.published.lock().is_empty()).await;
    let (topic, payload) = h.transport.published.lock()[0].clone();
    assert_eq!(topic, "sensor_recorder/HR/dev1");
    let line: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(line["recordingName"], "Run1");
    assert_eq!(line["data"][0]["hr"], 64);

    let file_sink = h.sinks.file_sink().clone();
    wait_for(|| {
        file_sink
            .first_message_saved()
            .get("dev1/HR")
            .copied()
            .unwrap_or(false)
    })
    .await;
    assert_eq!(
        h.orchestrator.router().last_values("dev1").get(&DataType::Hr),
        Some(&Some(64.0))
    );

    h.orchestrator.stop_recording().await;
}

#[tokio::test]
async fn test_already_recording() {
    let h = Harness::new(true, false, false).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;

    assert!(h.orchestrator.start_recording("Run1").await.is_success());
    let result = h.orchestrator.start_recording("Run2").await;

    assert_eq!(result, StartRecordingResult::AlreadyRecording);
    assert_eq!(h.orchestrator.session().name, "Run1");
    h.orchestrator.stop_recording().await;
}

#[tokio::test]
async fn test_stop_persists_log_and_resets_sinks() {
    let h = Harness::new(true, false, false).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;

    assert!(h.orchestrator.start_recording("Run1").await.is_success());
    h.orchestrator.stop_recording().await;

    assert!(!h.orchestrator.is_recording());
    assert_eq!(h.orchestrator.router().subscription_count(), 0);
    assert!(h.orchestrator.router().last_data_timestamp("dev1").is_none());

    let file_sink = h.sinks.file_sink();
    assert_eq!(
        file_sink.initialization_state(),
        InitializationState::NotStarted
    );
    assert!(file_sink.first_message_saved().is_empty());

    let content =
        std::fs::read_to_string(h.base.join("Run1").join("Strap").join("LOG.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines.iter().all(|l| l["dataType"] == "LOG"));
    assert!(lines
        .iter()
        .any(|l| l["data"]["message"] == "Recording Run1 started, saving to 1 data saver(s)"
            && l["data"]["type"] == "SUCCESS"));
    let last = lines.last().unwrap();
    assert_eq!(last["data"]["message"], "Recording stopped");
    assert_eq!(last["data"]["type"], "NORMAL");
}

#[tokio::test]
async fn test_stop_while_idle_logs_error() {
    let h = Harness::new(true, false, false).await;

    h.orchestrator.stop_recording().await;

    assert!(!h.orchestrator.is_recording());
    assert!(h.logged("Trying to stop recording while no recording in progress"));
}

#[tokio::test]
async fn test_log_entries_persisted_once() {
    let h = Harness::new(true, false, false).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;
    assert!(h.orchestrator.start_recording("Run1").await.is_success());

    h.log.flush_queue_sync();
    let entries = h.log.log_messages();
    h.orchestrator.handle_log_messages_changed(&entries).await;
    h.orchestrator.handle_log_messages_changed(&entries).await;

    let content =
        std::fs::read_to_string(h.base.join("Run1").join("Strap").join("LOG.jsonl")).unwrap();
    assert_eq!(content.lines().count(), entries.len());

    h.orchestrator.stop_recording().await;
}

#[tokio::test]
async fn test_devices_changed_while_idle() {
    let h = Harness::new(true, false, true).await;
    h.add_device("dev1", "Strap", true);

    let outcome = h.orchestrator.handle_devices_changed(&[]).await;
    assert_eq!(outcome, DevicesChangedOutcome::NoStateChange);
}

#[tokio::test]
async fn test_empty_device_set_stops_when_preferred() {
    let h = Harness::new(true, false, true).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;
    assert!(h.orchestrator.start_recording("Run1").await.is_success());

    let outcome = h.orchestrator.handle_devices_changed(&[]).await;

    assert_eq!(outcome, DevicesChangedOutcome::Stopped);
    assert!(!h.orchestrator.is_recording());
    assert_eq!(h.orchestrator.router().subscription_count(), 0);
}

#[tokio::test]
async fn test_empty_device_set_continues_and_reconnect_restarts() {
    let h = Harness::new(true, false, false).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;
    assert!(h.orchestrator.start_recording("Run1").await.is_success());
    wait_for(|| h.source.starts.load(Ordering::SeqCst) == 1).await;

    let outcome = h.orchestrator.handle_devices_changed(&[]).await;

    assert_eq!(outcome, DevicesChangedOutcome::RecordingContinues);
    assert!(h.orchestrator.is_recording());
    assert!(!h.orchestrator.router().has_subscriptions("dev1"));

    let connected = h.devices.connected_devices();
    let outcome = h.orchestrator.handle_devices_changed(&connected).await;

    assert_eq!(outcome, DevicesChangedOutcome::RecordingContinues);
    assert!(h.orchestrator.router().is_subscribed("dev1", DataType::Hr));
    wait_for(|| h.source.starts.load(Ordering::SeqCst) == 2).await;

    h.orchestrator.stop_recording().await;
}

#[tokio::test]
async fn test_publish_sink_init_then_stop_resets_state() {
    let h = Harness::new(false, true, false).await;
    h.add_device("dev1", "Strap", true);

    let publish = h.sinks.publish_sink();
    publish.init_saving("Run1", &h.sink_devices()).await;
    assert_eq!(publish.initialization_state(), InitializationState::Success);
    assert_eq!(publish.first_message_saved().get("dev1/LOG"), Some(&false));

    publish.stop_saving().await;
    assert_eq!(
        publish.initialization_state(),
        InitializationState::NotStarted
    );
    assert!(publish.first_message_saved().is_empty());
}

#[tokio::test]
async fn test_failing_log_persistence_does_not_feed_itself() {
    let h = Harness::new(false, true, false).await;
    h.add_device("dev1", "Strap", true);
    h.initialize_sinks("Run1").await;
    h.transport.fail.store(true, Ordering::SeqCst);

    let service = RecordingService::start(h.orchestrator.clone(), &h.devices, h.log.clone());
    assert!(h.orchestrator.start_recording("Run1").await.is_success());
    wait_for(|| h.logged("[dev1/LOG] Failed to publish data")).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = last_seq(&h.log);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(last_seq(&h.log), settled);

    let log_failures: Vec<_> = h
        .log
        .log_messages()
        .iter()
        .filter(|e| e.message.starts_with("[dev1/LOG]"))
        .cloned()
        .collect();
    assert_eq!(log_failures.len(), 1);
    assert!(log_failures[0].local_only);
    assert!(h.transport.published.lock().is_empty());

    service.shutdown().await;
    assert!(!h.orchestrator.is_recording());
}
