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

// Sink registry built from persisted preferences

use super::backend::{InitializationState, Sink};
use super::filesystem::SegmentedFileSink;
use super::publish::{PublishSink, TransportConnector};
use crate::device::DeviceInfoForSink;
use crate::log_state::LogState;
use crate::preferences::PreferenceStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Owns the sink instances for the lifetime of the process
pub struct SinkRegistry {
    file: Arc<SegmentedFileSink>,
    publish: Arc<PublishSink>,
}

impl SinkRegistry {
    /// Build every sink from `prefs` and enable those flagged as enabled
    pub async fn new(
        log: Arc<LogState>,
        prefs: Arc<dyn PreferenceStore>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let stored = prefs.preferences();

        let file = Arc::new(SegmentedFileSink::new(log.clone(), prefs.clone()));
        let publish = Arc::new(PublishSink::new(log, prefs, connector));

        if stored.file_sink_enabled {
            file.enable().await;
        }
        if stored.publish_sink_enabled {
            publish.enable().await;
        }

        let registry = Self { file, publish };
        info!(
            "Sink registry ready, {} of {} sink(s) enabled",
            registry.enabled_count(),
            registry.as_list().len()
        );
        registry
    }

    pub fn file_sink(&self) -> &Arc<SegmentedFileSink> {
        &self.file
    }

    pub fn publish_sink(&self) -> &Arc<PublishSink> {
        &self.publish
    }

    pub fn as_list(&self) -> Vec<Arc<dyn Sink>> {
        vec![
            self.file.clone() as Arc<dyn Sink>,
            self.publish.clone() as Arc<dyn Sink>,
        ]
    }

    pub fn enabled(&self) -> Vec<Arc<dyn Sink>> {
        self.as_list()
            .into_iter()
            .filter(|sink| sink.is_enabled())
            .collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.as_list().iter().filter(|sink| sink.is_enabled()).count()
    }

    /// Run `init_saving` on every enabled sink, in registry order
    pub async fn initialize_enabled(
        &self,
        session_name: &str,
        devices: &BTreeMap<String, DeviceInfoForSink>,
    ) -> Vec<(String, InitializationState)> {
        let mut results = Vec::new();
        for sink in self.enabled() {
            sink.init_saving(session_name, devices).await;
            results.push((sink.name().to_string(), sink.initialization_state()));
        }
        results
    }

    pub async fn cleanup_all(&self) {
        for sink in self.as_list() {
            sink.cleanup().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preferences;
    use crate::preferences::YamlPreferenceStore;
    use crate::storage::ZenohConnector;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_enabled_flags_applied_at_construction() {
        let temp_dir = TempDir::new().unwrap();
        let mut prefs = Preferences::default();
        prefs.file_sink.base_directory = temp_dir.path().to_string_lossy().to_string();
        prefs.file_sink_enabled = true;
        // Enabled but not configured: stays disabled
        prefs.publish_sink_enabled = true;

        let prefs: Arc<dyn PreferenceStore> = Arc::new(YamlPreferenceStore::in_memory(prefs));
        let registry = SinkRegistry::new(
            Arc::new(LogState::new()),
            prefs,
            Arc::new(ZenohConnector),
        )
        .await;

        assert_eq!(registry.as_list().len(), 2);
        assert_eq!(registry.enabled_count(), 1);
        assert_eq!(registry.enabled()[0].name(), "filesystem");
    }

    #[tokio::test]
    async fn test_initialize_enabled_reports_states() {
        let temp_dir = TempDir::new().unwrap();
        let mut prefs = Preferences::default();
        prefs.file_sink.base_directory = temp_dir.path().to_string_lossy().to_string();
        prefs.file_sink_enabled = true;

        let prefs: Arc<dyn PreferenceStore> = Arc::new(YamlPreferenceStore::in_memory(prefs));
        let registry = SinkRegistry::new(
            Arc::new(LogState::new()),
            prefs,
            Arc::new(ZenohConnector),
        )
        .await;

        let results = registry.initialize_enabled("Run1", &BTreeMap::new()).await;
        assert_eq!(
            results,
            vec![("filesystem".to_string(), InitializationState::Success)]
        );

        registry.cleanup_all().await;
        assert_eq!(
            registry.file_sink().initialization_state(),
            InitializationState::NotStarted
        );
    }
}
