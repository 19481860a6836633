//! Core types for the ingestion pipeline

pub mod expense;
pub mod file;
pub mod message;
pub mod run;

pub use expense::{CustomerUser, ExpenseRecord, StoredExpense};
pub use file::{hash_bytes, FileReference, FileType};
pub use message::{FilePayload, QueueMessage};
pub use run::{Outcome, ProcessingSummary};
