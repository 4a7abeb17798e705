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

//! Sample batches delivered by the stream source
//!
//! Each data type has a fixed sample shape. A batch is serialized once, at the
//! router boundary, into the `data` array of a [`SampleRecord`]; sinks never
//! look inside it.
//!
//! [`SampleRecord`]: crate::protocol::SampleRecord
use serde::{Deserialize, Serialize};

use crate::protocol::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrSample {
    pub hr: u32,
    #[serde(default)]
    pub rrs_ms: Vec<u32>,
    pub rr_available: bool,
    pub contact_status: bool,
    pub contact_status_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpiSample {
    pub ppi: u32,
    pub error_estimate: u32,
    pub hr: u32,
    pub blocker_bit: bool,
    pub skin_contact_status: bool,
    pub skin_contact_supported: bool,
}

/// Accelerometer sample, integer milli-g
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccSample {
    pub time_stamp: u64,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpgSample {
    pub time_stamp: u64,
    pub channel_samples: Vec<i32>,
}

/// ECG sample, microvolts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcgSample {
    pub time_stamp: u64,
    pub voltage: i32,
}

/// Three-axis float sample (gyroscope, magnetometer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vec3Sample {
    pub time_stamp: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureSample {
    pub time_stamp: u64,
    pub temperature: f32,
}

/// One delivery unit of samples for a (device, data type) pair
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBatch {
    Hr(Vec<HrSample>),
    Ppi(Vec<PpiSample>),
    Acc(Vec<AccSample>),
    Ppg(Vec<PpgSample>),
    Ecg(Vec<EcgSample>),
    Gyro(Vec<Vec3Sample>),
    Temperature(Vec<TemperatureSample>),
    SkinTemperature(Vec<TemperatureSample>),
    Magnetometer(Vec<Vec3Sample>),
}

impl SampleBatch {
    pub fn data_type(&self) -> DataType {
        match self {
            SampleBatch::Hr(_) => DataType::Hr,
            SampleBatch::Ppi(_) => DataType::Ppi,
            SampleBatch::Acc(_) => DataType::Acc,
            SampleBatch::Ppg(_) => DataType::Ppg,
            SampleBatch::Ecg(_) => DataType::Ecg,
            SampleBatch::Gyro(_) => DataType::Gyro,
            SampleBatch::Temperature(_) => DataType::Temperature,
            SampleBatch::SkinTemperature(_) => DataType::SkinTemperature,
            SampleBatch::Magnetometer(_) => DataType::Magnetometer,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBatch::Hr(s) => s.len(),
            SampleBatch::Ppi(s) => s.len(),
            SampleBatch::Acc(s) => s.len(),
            SampleBatch::Ppg(s) => s.len(),
            SampleBatch::Ecg(s) => s.len(),
            SampleBatch::Gyro(s) | SampleBatch::Magnetometer(s) => s.len(),
            SampleBatch::Temperature(s) | SampleBatch::SkinTemperature(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the samples as a JSON array
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            SampleBatch::Hr(s) => serde_json::to_value(s),
            SampleBatch::Ppi(s) => serde_json::to_value(s),
            SampleBatch::Acc(s) => serde_json::to_value(s),
            SampleBatch::Ppg(s) => serde_json::to_value(s),
            SampleBatch::Ecg(s) => serde_json::to_value(s),
            SampleBatch::Gyro(s) | SampleBatch::Magnetometer(s) => serde_json::to_value(s),
            SampleBatch::Temperature(s) | SampleBatch::SkinTemperature(s) => {
                serde_json::to_value(s)
            }
        }
    }
}

/// Scalar shown as "last value" for liveness display
///
/// Returns `None` for an empty batch or when the batch does not carry
/// `data_type` samples.
pub fn extract_scalar(data_type: DataType, batch: &SampleBatch) -> Option<f32> {
    if batch.data_type() != data_type {
        return None;
    }

    match batch {
        SampleBatch::Hr(s) => s.last().map(|v| v.hr as f32),
        SampleBatch::Ppi(s) => s.last().map(|v| v.ppi as f32),
        SampleBatch::Acc(s) => s.last().map(|v| v.x as f32),
        SampleBatch::Ppg(s) => s
            .first()
            .and_then(|v| v.channel_samples.last())
            .map(|c| *c as f32),
        SampleBatch::Ecg(s) => s.last().map(|v| v.voltage as f32),
        SampleBatch::Gyro(s) | SampleBatch::Magnetometer(s) => s.last().map(|v| v.x),
        SampleBatch::Temperature(s) | SampleBatch::SkinTemperature(s) => {
            s.last().map(|v| v.temperature)
        }
    }
}
