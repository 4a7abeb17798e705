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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data-type tag used for diagnostic log lines persisted next to sensor data
pub const LOG_DATA_TYPE: &str = "LOG";

/// Sensor modality streamed by a wearable device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Hr,
    Ppi,
    Acc,
    Ppg,
    Ecg,
    Gyro,
    Temperature,
    SkinTemperature,
    Magnetometer,
}

impl DataType {
    pub const ALL: [DataType; 9] = [
        DataType::Hr,
        DataType::Ppi,
        DataType::Acc,
        DataType::Ppg,
        DataType::Ecg,
        DataType::Gyro,
        DataType::Temperature,
        DataType::SkinTemperature,
        DataType::Magnetometer,
    ];

    /// Wire name, also used for file names and topic segments
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Hr => "HR",
            DataType::Ppi => "PPI",
            DataType::Acc => "ACC",
            DataType::Ppg => "PPG",
            DataType::Ecg => "ECG",
            DataType::Gyro => "GYRO",
            DataType::Temperature => "TEMPERATURE",
            DataType::SkinTemperature => "SKIN_TEMPERATURE",
            DataType::Magnetometer => "MAGNETOMETER",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str() == upper)
            .ok_or_else(|| format!("Unknown data type: '{}'", s))
    }
}

/// One persisted line, shared by the file sink and the publish sink
///
/// Serialized as `{phoneTimestamp, deviceId, recordingName, dataType, data}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    pub phone_timestamp: i64,
    pub device_id: String,
    pub recording_name: String,
    pub data_type: String,
    pub data: serde_json::Value,
}

impl SampleRecord {
    pub fn new(
        phone_timestamp: i64,
        device_id: impl Into<String>,
        recording_name: impl Into<String>,
        data_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            phone_timestamp,
            device_id: device_id.into(),
            recording_name: recording_name.into(),
            data_type: data_type.into(),
            data,
        }
    }

    /// `"{deviceId}/{dataType}"`, the key used by per-stream bookkeeping
    pub fn stream_key(&self) -> String {
        stream_key(&self.device_id, &self.data_type)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn stream_key(device_id: &str, data_type: &str) -> String {
    format!("{}/{}", device_id, data_type)
}

/// Payload of a persisted diagnostic log line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Topic for the publish sink: `{prefix}/{dataType}/{deviceId}`
pub fn publish_topic(prefix: &str, data_type: &str, device_id: &str) -> String {
    format!("{}/{}/{}", prefix.trim_end_matches('/'), data_type, device_id)
}

/// File name for a segment part: `{dataType}.jsonl`, then `{dataType}_part{n}.jsonl`
pub fn segment_file_name(data_type: &str, part: u32) -> String {
    if part <= 1 {
        format!("{}.jsonl", data_type)
    } else {
        format!("{}_part{}.jsonl", data_type, part)
    }
}

/// Make a user-supplied name safe to use as a single path component
pub fn path_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned.replace("..", "_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_round_trip_names() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
        assert_eq!("skin_temperature".parse::<DataType>().unwrap(), DataType::SkinTemperature);
        assert!("LOG".parse::<DataType>().is_err());
    }

    #[test]
    fn test_data_type_serde_name() {
        let json = serde_json::to_string(&DataType::SkinTemperature).unwrap();
        assert_eq!(json, "\"SKIN_TEMPERATURE\"");
    }

    #[test]
    fn test_record_json_field_names() {
        let record = SampleRecord::new(
            1_700_000_000_000,
            "A1B2C3",
            "Run1",
            "HR",
            serde_json::json!([{"hr": 72}]),
        );
        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();

        assert_eq!(value["phoneTimestamp"], 1_700_000_000_000i64);
        assert_eq!(value["deviceId"], "A1B2C3");
        assert_eq!(value["recordingName"], "Run1");
        assert_eq!(value["dataType"], "HR");
        assert_eq!(value["data"][0]["hr"], 72);
        assert_eq!(record.stream_key(), "A1B2C3/HR");
    }

    #[test]
    fn test_log_payload_shape() {
        let payload = LogPayload {
            kind: "ERROR".to_string(),
            message: "boom".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, serde_json::json!({"type": "ERROR", "message": "boom"}));
    }

    #[test]
    fn test_publish_topic() {
        assert_eq!(publish_topic("sensor_recorder", "ECG", "dev1"), "sensor_recorder/ECG/dev1");
        assert_eq!(publish_topic("lab/", "HR", "dev1"), "lab/HR/dev1");
    }

    #[test]
    fn test_segment_file_names() {
        assert_eq!(segment_file_name("ACC", 1), "ACC.jsonl");
        assert_eq!(segment_file_name("ACC", 2), "ACC_part2.jsonl");
        assert_eq!(segment_file_name("LOG", 11), "LOG_part11.jsonl");
    }

    #[test]
    fn test_path_component() {
        assert_eq!(path_component("Polar H10 ABC"), "Polar H10 ABC");
        assert_eq!(path_component("a/b"), "a_b");
        assert_eq!(path_component(".."), "_");
        assert_eq!(path_component("../etc"), "__etc");
        assert_eq!(path_component("  "), "_");
    }
}
