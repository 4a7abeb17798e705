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

// Multi-device wearable sensor recorder
//
// Records live sensor streams from several devices at once and fans every
// batch out to the enabled data sinks:
// - Per-(device, data type) stream subscriptions with bounded retry
// - Size-rotated JSONL segment files on the local filesystem
// - Network publish over zenoh
// - Diagnostic log persisted next to the sensor data

pub mod batch;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod log_state;
pub mod preferences;
pub mod protocol;
pub mod recorder;
pub mod router;
pub mod service;
pub mod storage;
pub mod stream;

// Re-export main types
pub use batch::{extract_scalar, SampleBatch};
pub use clock::{recording_name, AppInfo, Clock, SystemClock};
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use device::{ConnectionState, Device, DeviceInfoForSink, DeviceRegistry, DeviceState, SensorSetting};
pub use error::{SinkError, StreamError};
pub use log_state::{LogEntry, LogState, LogType};
pub use preferences::{PreferenceStore, YamlPreferenceStore};
pub use protocol::{DataType, SampleRecord, LOG_DATA_TYPE};
pub use recorder::{
    DevicesChangedOutcome, RecorderDeps, RecordingOrchestrator, RecordingSession,
    StartRecordingResult,
};
pub use router::SampleRouter;
pub use service::RecordingService;
pub use storage::{InitializationState, PublishSink, SegmentedFileSink, Sink, SinkRegistry};
pub use stream::{BatchStream, StreamSource, SyntheticStreamSource};
