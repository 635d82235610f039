use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::status::ConnStatus;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One append-only record in the bounded event log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Deltas pushed to every admitted realtime observer.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlEvent {
    Status { status: ConnStatus },
    Log { entry: LogEntry },
}

/// Bounded ring buffer of leveled records, fanning every append out to the
/// broadcast hub and mirroring it to tracing.
///
/// Entries are never mutated or individually removed; the oldest entry is
/// evicted once the buffer is at capacity.
pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    next_id: AtomicU64,
    tx: broadcast::Sender<ControlEvent>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    /// Append a record, evicting the oldest beyond capacity.
    pub fn append(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Info => tracing::info!(target: "vigil::events", "{}", entry.message),
            LogLevel::Warn => tracing::warn!(target: "vigil::events", "{}", entry.message),
            LogLevel::Error => tracing::error!(target: "vigil::events", "{}", entry.message),
        }

        {
            let mut entries = self.entries.lock();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        // No receivers is fine (e.g. before the server is up)
        let _ = self.tx.send(ControlEvent::Log {
            entry: entry.clone(),
        });
        entry
    }

    pub fn info(&self, message: impl Into<String>) -> LogEntry {
        self.append(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> LogEntry {
        self.append(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> LogEntry {
        self.append(LogLevel::Error, message)
    }

    /// Push a status snapshot to all observers.
    pub fn publish_status(&self, status: ConnStatus) {
        let _ = self.tx.send(ControlEvent::Status { status });
    }

    /// At most the last `limit` entries, most-recent-last.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let limit = limit.min(self.capacity);
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
