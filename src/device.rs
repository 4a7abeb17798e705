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

// Device snapshots and the device registry boundary

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::watch;

use crate::protocol::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Disconnecting,
    Connecting,
    FetchingCapabilities,
    FetchingSettings,
    Connected,
    Failed,
    NotConnectable,
}

/// Sensor setting key understood by the stream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettingType {
    SampleRate,
    Resolution,
    Range,
    Channels,
}

/// Selected settings for one data type, e.g. `{SAMPLE_RATE: 130}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSetting {
    pub settings: BTreeMap<SettingType, u32>,
}

impl SensorSetting {
    pub fn new(settings: impl IntoIterator<Item = (SettingType, u32)>) -> Self {
        Self {
            settings: settings.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Human-readable form used in session diagnostics
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(rate) = self.settings.get(&SettingType::SampleRate) {
            parts.push(format!("{} Hz", rate));
        }
        if let Some(resolution) = self.settings.get(&SettingType::Resolution) {
            parts.push(format!("{} bits", resolution));
        }
        if let Some(range) = self.settings.get(&SettingType::Range) {
            parts.push(format!("±{}g", range));
        }
        if let Some(channels) = self.settings.get(&SettingType::Channels) {
            parts.push(format!("{} ch", channels));
        }

        if parts.is_empty() {
            "(no configurable settings)".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub selected: bool,
    pub connection_state: ConnectionState,
    pub data_types: BTreeSet<DataType>,
    pub sensor_settings: HashMap<DataType, SensorSetting>,
    pub firmware_version: Option<String>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            selected: false,
            connection_state: ConnectionState::Disconnected,
            data_types: BTreeSet::new(),
            sensor_settings: HashMap::new(),
            firmware_version: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// What a sink needs to know about a device to prepare its outputs
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfoForSink {
    pub device_name: String,
    pub data_types: BTreeSet<DataType>,
}

impl DeviceInfoForSink {
    pub fn from_devices(devices: &[Device]) -> BTreeMap<String, DeviceInfoForSink> {
        devices
            .iter()
            .map(|d| {
                (
                    d.device_id.clone(),
                    DeviceInfoForSink {
                        device_name: d.name.clone(),
                        data_types: d.data_types.clone(),
                    },
                )
            })
            .collect()
    }
}

/// Read access to the device registry
pub trait DeviceRegistry: Send + Sync {
    fn selected_devices(&self) -> Vec<Device>;

    fn connected_devices(&self) -> Vec<Device>;

    fn data_types(&self, device_id: &str) -> BTreeSet<DataType>;

    /// Empty setting when nothing was selected for this pair
    fn sensor_settings(&self, device_id: &str, data_type: DataType) -> SensorSetting;
}

/// In-memory device registry
///
/// Every mutation replaces the device list and publishes the new connected
/// snapshot, so observers never see a half-updated device.
pub struct DeviceState {
    devices: RwLock<Vec<Device>>,
    connected: watch::Sender<Vec<Device>>,
    battery_levels: RwLock<HashMap<String, u8>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(Vec::new());
        Self {
            devices: RwLock::new(Vec::new()),
            connected,
            battery_levels: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a device once; later calls with the same id are ignored
    pub fn add_device(&self, device_id: &str, name: &str, connectable: bool) {
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.device_id == device_id) {
            return;
        }
        let mut device = Device::new(device_id, name);
        if !connectable {
            device.connection_state = ConnectionState::NotConnectable;
        }
        devices.push(device);
        self.publish(&devices);
    }

    fn update_device(&self, device_id: &str, update: impl FnOnce(&mut Device)) {
        let mut devices = self.devices.write();
        if let Some(device) = devices.iter_mut().find(|d| d.device_id == device_id) {
            update(device);
            self.publish(&devices);
        }
    }

    fn publish(&self, devices: &[Device]) {
        let connected: Vec<Device> = devices.iter().filter(|d| d.is_connected()).cloned().collect();
        self.connected.send_if_modified(|current| {
            if *current != connected {
                *current = connected;
                true
            } else {
                false
            }
        });
    }

    pub fn update_connection_state(&self, device_id: &str, state: ConnectionState) {
        self.update_device(device_id, |d| d.connection_state = state);
    }

    pub fn connection_state(&self, device_id: &str) -> ConnectionState {
        self.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id)
            .map(|d| d.connection_state)
            .unwrap_or(ConnectionState::NotConnectable)
    }

    pub fn toggle_selected(&self, device_id: &str) {
        self.update_device(device_id, |d| d.selected = !d.selected);
    }

    pub fn set_selected(&self, device_id: &str, selected: bool) {
        self.update_device(device_id, |d| d.selected = selected);
    }

    pub fn set_data_types(&self, device_id: &str, data_types: BTreeSet<DataType>) {
        self.update_device(device_id, |d| d.data_types = data_types);
    }

    pub fn set_sensor_settings(&self, device_id: &str, settings: HashMap<DataType, SensorSetting>) {
        self.update_device(device_id, |d| d.sensor_settings = settings);
    }

    pub fn set_firmware_version(&self, device_id: &str, version: &str) {
        self.update_device(device_id, |d| d.firmware_version = Some(version.to_string()));
    }

    pub fn update_battery_level(&self, device_id: &str, level: u8) {
        self.battery_levels
            .write()
            .insert(device_id.to_string(), level);
    }

    pub fn battery_level(&self, device_id: &str) -> Option<u8> {
        self.battery_levels.read().get(device_id).copied()
    }

    pub fn all_devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    /// Watch the connected-device snapshot
    pub fn subscribe_connected(&self) -> watch::Receiver<Vec<Device>> {
        self.connected.subscribe()
    }
}

impl DeviceRegistry for DeviceState {
    fn selected_devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .iter()
            .filter(|d| d.selected)
            .cloned()
            .collect()
    }

    fn connected_devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .iter()
            .filter(|d| d.is_connected())
            .cloned()
            .collect()
    }

    fn data_types(&self, device_id: &str) -> BTreeSet<DataType> {
        self.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id)
            .map(|d| d.data_types.clone())
            .unwrap_or_default()
    }

    fn sensor_settings(&self, device_id: &str, data_type: DataType) -> SensorSetting {
        self.devices
            .read()
            .iter()
            .find(|d| d.device_id == device_id)
            .and_then(|d| d.sensor_settings.get(&data_type).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_device_is_idempotent() {
        let state = DeviceState::new();
        state.add_device("A", "Strap A", true);
        state.add_device("A", "Renamed", true);
        state.add_device("B", "Band B", false);

        let devices = state.all_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Strap A");
        assert_eq!(devices[1].connection_state, ConnectionState::NotConnectable);
    }

    #[test]
    fn test_selected_and_connected_snapshots() {
        let state = DeviceState::new();
        state.add_device("A", "Strap A", true);
        state.add_device("B", "Band B", true);
        state.toggle_selected("A");
        state.update_connection_state("B", ConnectionState::Connected);

        let selected = state.selected_devices();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].device_id, "A");

        let connected = state.connected_devices();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].device_id, "B");
        assert_eq!(state.connection_state("missing"), ConnectionState::NotConnectable);
    }

    #[test]
    fn test_lookups_default_to_empty() {
        let state = DeviceState::new();
        state.add_device("A", "Strap A", true);
        state.set_data_types("A", [DataType::Hr, DataType::Ecg].into_iter().collect());
        state.set_sensor_settings(
            "A",
            HashMap::from([(DataType::Ecg, SensorSetting::new([(SettingType::SampleRate, 130)]))]),
        );

        assert_eq!(state.data_types("A").len(), 2);
        assert!(state.data_types("missing").is_empty());
        assert_eq!(
            state.sensor_settings("A", DataType::Ecg).settings[&SettingType::SampleRate],
            130
        );
        assert!(state.sensor_settings("A", DataType::Hr).is_empty());
    }

    #[test]
    fn test_connected_watch_only_fires_on_change() {
        let state = DeviceState::new();
        let mut rx = state.subscribe_connected();
        state.add_device("A", "Strap A", true);
        assert!(!rx.has_changed().unwrap());

        state.update_connection_state("A", ConnectionState::Connected);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        state.set_firmware_version("A", "5.0.0");
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_describe_settings() {
        let setting = SensorSetting::new([
            (SettingType::SampleRate, 52),
            (SettingType::Resolution, 16),
            (SettingType::Range, 8),
        ]);
        assert_eq!(setting.describe(), "52 Hz, 16 bits, ±8g");
        assert_eq!(SensorSetting::default().describe(), "(no configurable settings)");
    }
}
