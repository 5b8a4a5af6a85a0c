//! Shared types for logtap
//!
//! This crate contains the log entry model and the JSON bodies served by the
//! HTTP interface.

use serde::{Deserialize, Serialize};

// ============================================================================
// Log Types
// ============================================================================

/// Level assigned when a line carries no recognizable level tag
pub const DEFAULT_LEVEL: &str = "INFO";

/// A single captured log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique identifier (UUID v4)
    pub id: String,

    /// Capture time as epoch seconds
    pub timestamp: f64,

    /// Capture time as local wall clock, millisecond precision
    pub time: String,

    /// Free-form level tag
    pub level: String,

    /// Captured text
    pub message: String,
}

/// Suffix for a line force-split because it grew past the reassembly limit
pub const PARTIAL_MARKER: &str = " [partial]";

/// Suffix for a trailing line flushed without a terminator when capture stops
pub const FINAL_MARKER: &str = " [final]";

// ============================================================================
// HTTP Bodies
// ============================================================================

/// Body of `GET /logs`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
    pub count: usize,
    /// Time the snapshot was served, epoch seconds
    pub timestamp: f64,
}

impl LogsResponse {
    pub fn new(logs: Vec<LogEntry>, timestamp: f64) -> Self {
        Self {
            count: logs.len(),
            logs,
            timestamp,
        }
    }
}

/// Body of simple status replies such as `GET /clear`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn cleared() -> Self {
        Self {
            status: "cleared".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            id: "1".to_string(),
            timestamp: 1.5,
            time: "12:00:00.000".to_string(),
            level: DEFAULT_LEVEL.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_logs_response_counts_entries() {
        let response = LogsResponse::new(vec![entry("a"), entry("b")], 10.0);
        assert_eq!(response.count, 2);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["logs"][1]["message"], "b");
        assert_eq!(json["logs"][0]["level"], "INFO");
    }

    #[test]
    fn test_cleared_body() {
        let json = serde_json::to_string(&StatusResponse::cleared()).unwrap();
        assert_eq!(json, r#"{"status":"cleared"}"#);
    }
}
