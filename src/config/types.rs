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

// Configuration types for sensor-recorder

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub recorder: RecorderSettings,

    /// Seed for the preference store when its file does not exist yet
    #[serde(default)]
    pub preferences: Preferences,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Recorder-specific settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    #[serde(default = "default_preferences_path")]
    pub preferences_path: String,

    #[serde(default)]
    pub stream: StreamConfig,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            preferences_path: default_preferences_path(),
            stream: StreamConfig::default(),
        }
    }
}

/// Re-subscribe policy for sensor streams
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial back-off, doubled after every attempt
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl StreamConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Persisted user preferences: sink configuration, enabled flags, session naming
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Preferences {
    #[serde(default)]
    pub file_sink: FileSinkConfig,

    #[serde(default)]
    pub file_sink_enabled: bool,

    #[serde(default)]
    pub publish_sink: PublishConfig,

    #[serde(default)]
    pub publish_sink_enabled: bool,

    #[serde(default)]
    pub session: SessionPreferences,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FileSinkConfig {
    #[serde(default)]
    pub base_directory: String,

    /// 0 disables size-based rotation
    #[serde(default = "default_split_at_size_mb")]
    pub split_at_size_mb: u64,

    #[serde(default = "default_rotation_check_interval")]
    pub rotation_check_interval_seconds: u64,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            base_directory: String::new(),
            split_at_size_mb: default_split_at_size_mb(),
            rotation_check_interval_seconds: default_rotation_check_interval(),
        }
    }
}

impl FileSinkConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_directory.trim().is_empty()
    }

    /// Rotation threshold in bytes, `None` when rotation is disabled
    pub fn split_threshold_bytes(&self) -> Option<u64> {
        if self.split_at_size_mb == 0 {
            None
        } else {
            Some(self.split_at_size_mb.saturating_mul(1024 * 1024))
        }
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_check_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PublishConfig {
    /// e.g. `tcp/192.168.1.10:7447`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_mode")]
    pub mode: String, // "peer" or "client"

    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            mode: default_mode(),
            client_id: String::new(),
            topic_prefix: default_topic_prefix(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl PublishConfig {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionPreferences {
    #[serde(default = "default_recording_name")]
    pub recording_name: String,

    #[serde(default = "default_true")]
    pub append_timestamp: bool,

    #[serde(default)]
    pub stop_on_disconnect: bool,
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            recording_name: default_recording_name(),
            append_timestamp: true,
            stop_on_disconnect: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_preferences_path() -> String { "recorder-preferences.yaml".to_string() }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 100 }
fn default_split_at_size_mb() -> u64 { 20 }
fn default_rotation_check_interval() -> u64 { 60 }
fn default_mode() -> String { "client".to_string() }
fn default_topic_prefix() -> String { "sensor_recorder".to_string() }
fn default_connect_timeout() -> u64 { 10 }
fn default_recording_name() -> String { "SensorRecording".to_string() }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
