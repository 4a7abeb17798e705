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

// Sensor stream source boundary

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

use crate::batch::*;
use crate::device::{SensorSetting, SettingType};
use crate::error::StreamError;
use crate::protocol::DataType;

/// Batches for one (device, data type) pair; dropping it stops the stream
pub type BatchStream = BoxStream<'static, Result<SampleBatch, StreamError>>;

/// Per-device, per-data-type sample stream provider (device SDK boundary)
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Start streaming with the given sensor settings
    ///
    /// An `Err` here and an `Err` item on the stream are both treated as a
    /// stream failure by the router.
    async fn start_stream(
        &self,
        device_id: &str,
        data_type: DataType,
        settings: &SensorSetting,
    ) -> Result<BatchStream, StreamError>;

    /// SDK version string written to the session diagnostics
    fn sdk_version(&self) -> String;
}

/// Stream source producing plausible random data without hardware
pub struct SyntheticStreamSource {
    hr_period: Duration,
    batch_period: Duration,
}

impl Default for SyntheticStreamSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_millis(100))
    }
}

impl SyntheticStreamSource {
    pub fn new(hr_period: Duration, batch_period: Duration) -> Self {
        Self {
            hr_period,
            batch_period,
        }
    }

    fn default_rate(data_type: DataType) -> u32 {
        match data_type {
            DataType::Ecg => 130,
            DataType::Acc | DataType::Gyro | DataType::Magnetometer => 52,
            DataType::Ppg => 55,
            DataType::Temperature | DataType::SkinTemperature => 10,
            DataType::Hr | DataType::Ppi => 1,
        }
    }
}

/// Generator state for one synthetic stream
struct Generator {
    data_type: DataType,
    rng: StdRng,
    samples_per_batch: usize,
    sample_interval_ns: u64,
    clock_ns: u64,
    channels: usize,
}

impl Generator {
    fn next_time(&mut self) -> u64 {
        self.clock_ns += self.sample_interval_ns;
        self.clock_ns
    }

    fn next_batch(&mut self) -> SampleBatch {
        let n = self.samples_per_batch;
        match self.data_type {
            DataType::Hr => {
                let hr = self.rng.gen_range(55..95);
                SampleBatch::Hr(vec![HrSample {
                    hr,
                    rrs_ms: vec![60_000 / hr.max(1)],
                    rr_available: true,
                    contact_status: true,
                    contact_status_supported: true,
                }])
            }
            DataType::Ppi => {
                let ppi = self.rng.gen_range(650..1100);
                SampleBatch::Ppi(vec![PpiSample {
                    ppi,
                    error_estimate: self.rng.gen_range(5..20),
                    hr: 60_000 / ppi,
                    blocker_bit: false,
                    skin_contact_status: true,
                    skin_contact_supported: true,
                }])
            }
            DataType::Acc => SampleBatch::Acc(
                (0..n)
                    .map(|_| AccSample {
                        time_stamp: self.next_time(),
                        x: self.rng.gen_range(-50..50),
                        y: self.rng.gen_range(-50..50),
                        z: 1000 + self.rng.gen_range(-30..30),
                    })
                    .collect(),
            ),
            DataType::Ppg => SampleBatch::Ppg(
                (0..n)
                    .map(|_| PpgSample {
                        time_stamp: self.next_time(),
                        channel_samples: (0..self.channels)
                            .map(|_| self.rng.gen_range(-200_000..200_000))
                            .collect(),
                    })
                    .collect(),
            ),
            DataType::Ecg => SampleBatch::Ecg(
                (0..n)
                    .map(|_| EcgSample {
                        time_stamp: self.next_time(),
                        voltage: self.rng.gen_range(-400..1200),
                    })
                    .collect(),
            ),
            DataType::Gyro | DataType::Magnetometer => {
                let samples = (0..n)
                    .map(|_| Vec3Sample {
                        time_stamp: self.next_time(),
                        x: self.rng.gen_range(-2.0..2.0),
                        y: self.rng.gen_range(-2.0..2.0),
                        z: self.rng.gen_range(-2.0..2.0),
                    })
                    .collect();
                if self.data_type == DataType::Gyro {
                    SampleBatch::Gyro(samples)
                } else {
                    SampleBatch::Magnetometer(samples)
                }
            }
            DataType::Temperature | DataType::SkinTemperature => {
                let samples = (0..n)
                    .map(|_| TemperatureSample {
                        time_stamp: self.next_time(),
                        temperature: 33.0 + self.rng.gen_range(-0.5..0.5),
                    })
                    .collect();
                if self.data_type == DataType::Temperature {
                    SampleBatch::Temperature(samples)
                } else {
                    SampleBatch::SkinTemperature(samples)
                }
            }
        }
    }
}

#[async_trait]
impl StreamSource for SyntheticStreamSource {
    async fn start_stream(
        &self,
        _device_id: &str,
        data_type: DataType,
        settings: &SensorSetting,
    ) -> Result<BatchStream, StreamError> {
        let period = match data_type {
            DataType::Hr | DataType::Ppi => self.hr_period,
            _ => self.batch_period,
        };

        let rate = settings
            .settings
            .get(&SettingType::SampleRate)
            .copied()
            .unwrap_or_else(|| Self::default_rate(data_type))
            .max(1);
        let samples_per_batch = ((rate as u128 * period.as_millis()) / 1000).max(1) as usize;

        let mut generator = Generator {
            data_type,
            rng: StdRng::from_entropy(),
            samples_per_batch,
            sample_interval_ns: 1_000_000_000 / rate as u64,
            clock_ns: 0,
            channels: settings
                .settings
                .get(&SettingType::Channels)
                .copied()
                .unwrap_or(4) as usize,
        };

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Ok(IntervalStream::new(interval)
            .map(move |_| Ok::<_, StreamError>(generator.next_batch()))
            .boxed())
    }

    fn sdk_version(&self) -> String {
        format!("synthetic-{}", env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_batches_match_data_type() {
        let source = SyntheticStreamSource::new(Duration::from_millis(5), Duration::from_millis(5));

        for data_type in DataType::ALL {
            let mut stream = source
                .start_stream("dev1", data_type, &SensorSetting::default())
                .await
                .unwrap();
            let batch = stream.next().await.unwrap().unwrap();
            assert_eq!(batch.data_type(), data_type);
            assert!(!batch.is_empty());
            assert!(extract_scalar(data_type, &batch).is_some());
        }
    }

    #[tokio::test]
    async fn test_sample_rate_controls_batch_size() {
        let source =
            SyntheticStreamSource::new(Duration::from_secs(1), Duration::from_millis(100));
        let settings = SensorSetting::new([(SettingType::SampleRate, 200)]);

        let mut stream = source
            .start_stream("dev1", DataType::Acc, &settings)
            .await
            .unwrap();
        let batch = stream.next().await.unwrap().unwrap();
        assert_eq!(batch.len(), 20);
    }
}
