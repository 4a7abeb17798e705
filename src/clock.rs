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

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::preferences::SessionPreferences;

/// Wall-clock source for sample timestamps and session names
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;

    fn now_local(&self) -> DateTime<Local> {
        Local
            .timestamp_millis_opt(self.now_millis())
            .single()
            .unwrap_or_else(Local::now)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Application identity written to the diagnostic log at session start
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub os: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

/// Session name from the preferred base name, optionally timestamped
pub fn recording_name(session: &SessionPreferences, clock: &dyn Clock) -> String {
    if session.append_timestamp {
        format!(
            "{}_{}",
            session.recording_name,
            clock.now_local().format("%Y-%m-%d_%H-%M-%S")
        )
    } else {
        session.recording_name.clone()
    }
}
