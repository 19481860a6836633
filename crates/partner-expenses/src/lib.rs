//! partner-expenses: queue-driven ingestion of partner expense files
//!
//! Messages name a file in object storage. The worker fetches it, parses it
//! with the parser for its type (CSV or Excel; Word is recognized but not yet
//! read) and persists the rows as expense records. A message is deleted only
//! after its records are stored; files that can never succeed go to a
//! dead-letter queue.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod storage;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result, RowParseError};
pub use processing::{ExpenseWorker, WorkerConfig, WorkerDeps};
pub use types::{
    expense::{CustomerUser, ExpenseRecord, StoredExpense},
    file::{FileReference, FileType},
    message::{FilePayload, QueueMessage},
    run::{Outcome, ProcessingSummary},
};
