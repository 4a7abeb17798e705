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

// Storage sink module
//
// Provides a trait-based abstraction for persistence sinks,
// allowing the recorder to fan every record out to several
// endpoints (segmented local files, network publish).
//
// This module focuses on WRITE-ONLY operations.

pub mod backend;
pub mod filesystem;
pub mod publish;
pub mod registry;

pub use backend::{InitializationState, Sink, SinkState};
pub use filesystem::{SegmentedFileSink, FILE_SINK_NAME};
pub use publish::{
    PublishSink, PublishTransport, TransportConnector, ZenohConnector, ZenohTransport,
    PUBLISH_SINK_NAME,
};
pub use registry::SinkRegistry;
