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

//! Append-only diagnostic log
//!
//! Producers (sinks, router tasks, the orchestrator) only push onto a
//! lock-free queue. The queue is merged into the visible list by
//! [`LogState::flush_queue_sync`], either from the flusher task or directly
//! when a caller needs the entries to be visible right now.
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{error, info};

/// Number of entries kept in the visible list
pub const MAX_LOG_MESSAGES: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    Success,
    Normal,
    Error,
}

impl LogType {
    pub fn as_str(self) -> &'static str {
        match self {
            LogType::Success => "SUCCESS",
            LogType::Normal => "NORMAL",
            LogType::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Strictly increasing, never reused, survives list trimming
    pub seq: u64,
    pub message: String,
    pub log_type: LogType,
    pub timestamp: i64,
    /// Shown and traced, but never written to the sinks
    #[serde(default)]
    pub local_only: bool,
}

pub struct LogState {
    queue: SegQueue<LogEntry>,
    next_seq: AtomicU64,
    // Held only while merging; keeps seq order in the list
    merge: Mutex<()>,
    entries: watch::Sender<Arc<Vec<LogEntry>>>,
    notices: Mutex<VecDeque<LogEntry>>,
    flush_requested: Notify,
}

impl Default for LogState {
    fn default() -> Self {
        Self::new()
    }
}

impl LogState {
    pub fn new() -> Self {
        let (entries, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            queue: SegQueue::new(),
            next_seq: AtomicU64::new(0),
            merge: Mutex::new(()),
            entries,
            notices: Mutex::new(VecDeque::new()),
            flush_requested: Notify::new(),
        }
    }

    pub fn add_log_message(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.add(message, LogType::Normal, false, false);
    }

    pub fn add_log_success(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.add(message, LogType::Success, false, false);
    }

    pub fn add_log_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.add(message, LogType::Error, true, false);
    }

    /// Error about persisting the log itself; never persisted to the sinks
    pub fn add_local_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.add(message, LogType::Error, true, true);
    }

    fn add(&self, message: String, log_type: LogType, notice: bool, local_only: bool) {
        let timestamp = chrono::Utc::now().timestamp_millis();

        {
            // seq is assigned under the merge lock so the queue drains in seq order
            let _guard = self.merge.lock();
            let entry = LogEntry {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                message,
                log_type,
                timestamp,
                local_only,
            };
            if notice {
                let mut notices = self.notices.lock();
                if notices.len() >= MAX_LOG_MESSAGES {
                    notices.pop_front();
                }
                notices.push_back(entry.clone());
            }
            self.queue.push(entry);
        }

        self.flush_requested.notify_one();
    }

    /// Merge every queued entry into the visible list and publish it
    pub fn flush_queue_sync(&self) {
        let _guard = self.merge.lock();

        let mut drained = Vec::new();
        while let Some(entry) = self.queue.pop() {
            drained.push(entry);
        }
        if drained.is_empty() {
            return;
        }

        self.entries.send_modify(|current| {
            let mut updated: Vec<LogEntry> = current.iter().cloned().collect();
            updated.extend(drained);
            if updated.len() > MAX_LOG_MESSAGES {
                updated.drain(..updated.len() - MAX_LOG_MESSAGES);
            }
            *current = Arc::new(updated);
        });
    }

    /// Wait until some producer asks for a flush
    pub async fn flush_requested(&self) {
        self.flush_requested.notified().await;
    }

    /// Snapshot of the visible list
    pub fn log_messages(&self) -> Arc<Vec<LogEntry>> {
        self.entries.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<LogEntry>>> {
        self.entries.subscribe()
    }

    /// Oldest error entry not yet shown to an operator
    pub fn pop_notice(&self) -> Option<LogEntry> {
        self.notices.lock().pop_front()
    }

    pub fn clear_logs(&self) {
        let _guard = self.merge.lock();
        while self.queue.pop().is_some() {}
        self.notices.lock().clear();
        self.entries.send_replace(Arc::new(Vec::new()));
    }
}
