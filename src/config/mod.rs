// Configuration module for sensor-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply `RECORDER_BASE_DIR` and `RECORDER_PUBLISH_ENDPOINT` on top of a loaded config
pub fn apply_env_overrides(config: &mut RecorderConfig) {
    if let Ok(base_dir) = std::env::var("RECORDER_BASE_DIR") {
        config.preferences.file_sink.base_directory = base_dir;
    }

    if let Ok(endpoint) = std::env::var("RECORDER_PUBLISH_ENDPOINT") {
        config.preferences.publish_sink.endpoint = endpoint;
    }
}
