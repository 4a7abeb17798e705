// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::parse(&content)
    }

    /// Parse configuration text (substitution, YAML, validation)
    pub fn parse(content: &str) -> Result<RecorderConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: RecorderConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${RECORDER_PREFS:-prefs.yaml} -> prefs.yaml (if RECORDER_PREFS not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
            .context("Invalid substitution pattern")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });

        Ok(substituted.into_owned())
    }

    /// Validate configuration
    pub fn validate(config: &RecorderConfig) -> Result<()> {
        if config.recorder.preferences_path.trim().is_empty() {
            bail!("recorder.preferences_path cannot be empty");
        }

        if config.recorder.stream.max_retries > 10 {
            bail!("stream.max_retries must be 0-10");
        }

        if config.preferences.file_sink.rotation_check_interval_seconds == 0 {
            bail!("file_sink.rotation_check_interval_seconds must be > 0");
        }

        let publish = &config.preferences.publish_sink;
        if publish.connect_timeout_seconds == 0 {
            bail!("publish_sink.connect_timeout_seconds must be > 0");
        }

        match publish.mode.as_str() {
            "peer" | "client" => {}
            unknown => bail!("Unknown publish mode: '{}'. Supported: peer, client", unknown),
        }

        Ok(())
    }
}
