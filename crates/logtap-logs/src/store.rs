use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{Local, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use logtap_types::LogEntry;

/// Default number of retained entries
pub const DEFAULT_CAPACITY: usize = 100;

/// Thread-safe ring buffer of recent log entries
///
/// Every operation goes through one mutex, so concurrent ingests and HTTP
/// reads or clears never observe a half-applied change. Readers get
/// point-in-time copies instead of iterating live state.
#[derive(Clone)]
pub struct LogStore {
    /// Internal storage
    entries: Arc<Mutex<VecDeque<LogEntry>>>,

    /// Maximum capacity
    capacity: usize,
}

impl LogStore {
    /// Create a new store with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Record a message, evicting the oldest entries beyond capacity
    pub fn ingest(&self, message: impl Into<String>, level: impl Into<String>) -> LogEntry {
        let now = Utc::now();
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            time: now.with_timezone(&Local).format("%H:%M:%S%.3f").to_string(),
            level: level.into(),
            message: message.into(),
        };

        let mut entries = self.entries.lock();
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        entry
    }

    /// Copy of all entries, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Total entry count
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
