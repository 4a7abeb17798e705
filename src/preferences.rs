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

// Durable user preferences
//
// Sinks read their configuration and enabled flag from here and write them
// back on configure/enable/disable. The YAML-backed store rewrites the whole
// document on every change.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use crate::config::{FileSinkConfig, Preferences, PublishConfig, SessionPreferences};

/// Key/value preference storage shared by sinks and the orchestrator
pub trait PreferenceStore: Send + Sync {
    /// Snapshot of the whole document
    fn preferences(&self) -> Preferences;

    /// Apply a change and persist it
    fn update(&self, change: &mut dyn FnMut(&mut Preferences)) -> Result<()>;

    fn file_sink_config(&self) -> FileSinkConfig {
        self.preferences().file_sink
    }

    fn publish_config(&self) -> PublishConfig {
        self.preferences().publish_sink
    }

    fn session(&self) -> SessionPreferences {
        self.preferences().session
    }

    fn stop_on_disconnect(&self) -> bool {
        self.preferences().session.stop_on_disconnect
    }

    fn set_file_sink_config(&self, config: FileSinkConfig) -> Result<()> {
        self.update(&mut |p| p.file_sink = config.clone())
    }

    fn set_file_sink_enabled(&self, enabled: bool) -> Result<()> {
        self.update(&mut |p| p.file_sink_enabled = enabled)
    }

    fn set_publish_config(&self, config: PublishConfig) -> Result<()> {
        self.update(&mut |p| p.publish_sink = config.clone())
    }

    fn set_publish_sink_enabled(&self, enabled: bool) -> Result<()> {
        self.update(&mut |p| p.publish_sink_enabled = enabled)
    }

    fn set_session(&self, session: SessionPreferences) -> Result<()> {
        self.update(&mut |p| p.session = session.clone())
    }
}

/// Preference store persisted as a YAML document
pub struct YamlPreferenceStore {
    path: Option<PathBuf>,
    prefs: RwLock<Preferences>,
}

impl YamlPreferenceStore {
    /// Open the document at `path`, writing `seed` there if it does not exist
    pub fn open<P: AsRef<Path>>(path: P, seed: Preferences) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let prefs = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read preferences: {}", path.display()))?;
            let prefs: Preferences = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse preferences: {}", path.display()))?;
            info!("Loaded preferences from {}", path.display());
            prefs
        } else {
            Self::write_document(&path, &seed)?;
            info!("Created preferences file {}", path.display());
            seed
        };

        Ok(Self {
            path: Some(path),
            prefs: RwLock::new(prefs),
        })
    }

    /// Store that never touches disk
    pub fn in_memory(prefs: Preferences) -> Self {
        Self {
            path: None,
            prefs: RwLock::new(prefs),
        }
    }

    fn write_document(path: &Path, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create preferences directory: {}", parent.display())
                })?;
            }
        }

        let yaml = serde_yaml::to_string(prefs).context("Failed to serialize preferences")?;
        // Readers never see a half-written document
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)
            .with_context(|| format!("Failed to write preferences: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace preferences: {}", path.display()))?;
        Ok(())
    }
}

impl PreferenceStore for YamlPreferenceStore {
    fn preferences(&self) -> Preferences {
        self.prefs.read().clone()
    }

    fn update(&self, change: &mut dyn FnMut(&mut Preferences)) -> Result<()> {
        let mut prefs = self.prefs.write();
        change(&mut prefs);

        // Written under the lock so concurrent updates reach disk in order
        if let Some(path) = &self.path {
            Self::write_document(path, &prefs)?;
            debug!("Preferences saved to {}", path.display());
        }
        Ok(())
    }
}
