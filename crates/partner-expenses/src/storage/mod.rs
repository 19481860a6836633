//! Storage module for persistent data storage
//!
//! SQLite persistence for expenses, the run ledger and the local work queue.

mod database;
mod queue_db;

pub use database::{dedup_key, ExpenseDb};
pub use queue_db::SqliteQueue;
