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

// Error types for sinks and stream sources

use thiserror::Error;

/// Failure of a single sink operation
///
/// These never escape a sink's public operations; they are turned into
/// diagnostic log entries at the sink boundary.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no sink opened for {key}")]
    NoSegmentOpen { key: String },

    #[error("sink not initialized")]
    NotInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("connection failed: {0}")]
    Connect(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Failure reported by the external stream source
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    #[error("stream transport error: {0}")]
    Transport(String),

    #[error("device {0} is not available")]
    DeviceUnavailable(String),

    #[error("data type {0} is not supported by this source")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SinkError::NoSegmentOpen {
            key: "dev1/HR".into(),
        };
        assert!(err.to_string().contains("no sink opened for dev1/HR"));

        let err = SinkError::Publish("broker gone".into());
        assert!(err.to_string().contains("broker gone"));

        let err = StreamError::DeviceUnavailable("dev2".into());
        assert!(err.to_string().contains("dev2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: SinkError = io.into();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
