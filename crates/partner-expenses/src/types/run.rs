//! Per-message processing outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a message after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Persisted and deleted from the queue
    Completed,
    /// Left on the queue for redelivery
    Retrying,
    /// Moved to the dead-letter queue
    DeadLettered,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Retrying => "retrying",
            Outcome::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Outcome::Completed),
            "retrying" => Some(Outcome::Retrying),
            "dead_lettered" => Some(Outcome::DeadLettered),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable result of processing one queue message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub message_id: String,
    /// Delivery this summary belongs to
    pub receive_count: u32,
    /// Object key, empty when the body could not be decoded
    pub source_key: String,
    pub file_type: String,
    pub records_parsed: usize,
    pub records_saved: usize,
    pub duplicates_skipped: usize,
    pub row_errors: usize,
    pub store_failures: usize,
    pub outcome: Outcome,
    pub duration_ms: u64,
    /// Error kind and text for non-completed outcomes
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessingSummary {
    pub fn new(message_id: impl Into<String>, receive_count: u32) -> Self {
        Self {
            message_id: message_id.into(),
            receive_count,
            source_key: String::new(),
            file_type: String::new(),
            records_parsed: 0,
            records_saved: 0,
            duplicates_skipped: 0,
            row_errors: 0,
            store_failures: 0,
            outcome: Outcome::Completed,
            duration_ms: 0,
            error: None,
            finished_at: Utc::now(),
        }
    }
}
