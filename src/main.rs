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

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sensor_recorder::config::{load_config_with_env, LoggingConfig};
use sensor_recorder::storage::ZenohConnector;
use sensor_recorder::{
    recording_name, AppInfo, ConnectionState, DataType, DeviceInfoForSink, DeviceRegistry,
    DeviceState, InitializationState, LogState, PreferenceStore, RecorderDeps,
    RecordingOrchestrator, RecordingService, SinkRegistry, SyntheticStreamSource, SystemClock,
    YamlPreferenceStore,
};

/// Sensor Recorder - Record wearable sensor streams to files and the network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Recording name (overrides the stored session preference)
    #[arg(short, long)]
    name: Option<String>,

    /// Device to record, as ID[:NAME[:TYPE,TYPE..]] (repeatable)
    #[arg(short, long = "device", value_parser = parse_device)]
    devices: Vec<DeviceArg>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
struct DeviceArg {
    id: String,
    name: String,
    data_types: BTreeSet<DataType>,
}

fn parse_device(value: &str) -> Result<DeviceArg, String> {
    let mut parts = value.splitn(3, ':');
    let id = parts.next().unwrap_or_default().trim().to_string();
    if id.is_empty() {
        return Err("device id cannot be empty".to_string());
    }
    let name = parts
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&id)
        .to_string();
    let data_types = match parts.next() {
        Some(types) => types
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(str::parse::<DataType>)
            .collect::<Result<BTreeSet<DataType>, String>>()?,
        None => [DataType::Hr].into_iter().collect(),
    };

    Ok(DeviceArg {
        id,
        name,
        data_types,
    })
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let level = match logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => logging.level.to_lowercase(),
        _ => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let config = load_config_with_env(&args.config)?;

    init_tracing(&config.logging)?;

    info!("Starting Sensor Recorder");
    info!("Loaded configuration from: {:?}", args.config);

    if args.devices.is_empty() {
        bail!("At least one --device is required");
    }

    let prefs: Arc<dyn PreferenceStore> = Arc::new(
        YamlPreferenceStore::open(&config.recorder.preferences_path, config.preferences.clone())
            .with_context(|| {
                format!(
                    "Failed to open preferences at {}",
                    config.recorder.preferences_path
                )
            })?,
    );

    let log = Arc::new(LogState::new());
    let sinks = Arc::new(
        SinkRegistry::new(log.clone(), prefs.clone(), Arc::new(ZenohConnector)).await,
    );

    let devices = Arc::new(DeviceState::new());
    for device in &args.devices {
        devices.add_device(&device.id, &device.name, true);
        devices.set_data_types(&device.id, device.data_types.clone());
        devices.set_selected(&device.id, true);
        devices.update_connection_state(&device.id, ConnectionState::Connected);
        info!("Device {} ({}): {:?}", device.name, device.id, device.data_types);
    }

    let clock = Arc::new(SystemClock);
    let name = match args.name {
        Some(name) => name,
        None => recording_name(&prefs.session(), clock.as_ref()),
    };

    // Open sink resources for this session
    let sink_devices = DeviceInfoForSink::from_devices(&devices.selected_devices());
    for (sink, state) in sinks.initialize_enabled(&name, &sink_devices).await {
        if state == InitializationState::Success {
            info!("Data saver {} initialized", sink);
        } else {
            warn!("Data saver {} failed to initialize", sink);
        }
    }

    let orchestrator = Arc::new(RecordingOrchestrator::new(RecorderDeps {
        devices: devices.clone(),
        sinks: sinks.clone(),
        source: Arc::new(SyntheticStreamSource::default()),
        log: log.clone(),
        prefs: prefs.clone(),
        clock,
        app_info: AppInfo::default(),
        stream: config.recorder.stream.clone(),
    }));

    let service = RecordingService::start(orchestrator.clone(), &devices, log.clone());

    let result = orchestrator.start_recording(&name).await;
    if !result.is_success() {
        service.shutdown().await;
        bail!("Failed to start recording {}: {:?}", name, result);
    }

    // Record until Ctrl+C or the requested duration
    match args.duration_seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                    info!("Recording duration of {}s elapsed", seconds);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Cleanup
    service.shutdown().await;
    info!("Sensor Recorder shut down successfully");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_defaults() {
        let device = parse_device("dev1").unwrap();
        assert_eq!(device.id, "dev1");
        assert_eq!(device.name, "dev1");
        assert_eq!(device.data_types, BTreeSet::from([DataType::Hr]));
    }

    #[test]
    fn test_parse_device_full() {
        let device = parse_device("A1B2:Chest strap:hr,ecg,ACC").unwrap();
        assert_eq!(device.name, "Chest strap");
        assert_eq!(
            device.data_types,
            BTreeSet::from([DataType::Hr, DataType::Ecg, DataType::Acc])
        );
    }

    #[test]
    fn test_parse_device_rejects_unknown_type() {
        assert!(parse_device("dev1:Strap:HR,BOGUS").is_err());
        assert!(parse_device(":Strap").is_err());
    }
}
