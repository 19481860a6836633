//! Expense store provider trait

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ExpenseRecord, ProcessingSummary};

/// The file a batch of records came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Normalized object key
    pub key: String,
    /// File name from the message
    pub name: String,
    /// SHA-256 of the file bytes
    pub content_hash: String,
    pub file_type: String,
    /// Queue delivery writing the batch, `<message_id>:<receive_count>`
    pub delivery_id: String,
}

/// Result of persisting one batch
#[derive(Debug, Clone, Default)]
pub struct SaveOutcome {
    /// Rows written by this delivery, including rows an abandoned attempt of
    /// the same delivery committed before this call
    pub inserted: usize,
    /// Rows already stored by an earlier delivery of the same file
    pub duplicates: usize,
    /// Records the store rejected, with the reason. Non-empty means a partial
    /// failure; the rest of the batch is still saved.
    pub failures: Vec<(ExpenseRecord, String)>,
}

impl SaveOutcome {
    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Persistent storage for expense records
///
/// Implementations:
/// - `ExpenseDb`: SQLite
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    /// Persist records from one file.
    ///
    /// Saving the same `(content_hash, row)` twice stores it once, so a
    /// redelivered message never duplicates expenses. A connection or write
    /// failure fails the whole call with `StoreWrite`; a record rejected on
    /// its own merits lands in `SaveOutcome::failures`.
    async fn save_batch(&self, source: &SourceInfo, records: &[ExpenseRecord]) -> Result<SaveOutcome>;

    /// Append a processing summary to the run ledger
    async fn record_run(&self, summary: &ProcessingSummary) -> Result<()>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
