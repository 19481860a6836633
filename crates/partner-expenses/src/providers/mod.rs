//! Provider abstractions for object storage, work queues and the expense store
//!
//! Trait-based so the worker runs against local backends (filesystem, SQLite)
//! or AWS (S3, SQS) without code changes.

pub mod expense_store;
pub mod local;
pub mod object_store;
pub mod queue;

#[cfg(feature = "aws")]
pub mod aws;

pub use expense_store::{ExpenseStore, SaveOutcome, SourceInfo};
pub use local::LocalObjectStore;
pub use object_store::ObjectStoreProvider;
pub use queue::{QueueProvider, ReceiveOptions};
