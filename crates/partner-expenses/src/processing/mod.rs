//! Message processing: retries, queue consumption and the ingestion worker

mod consumer;
mod retry;
mod worker;

pub use consumer::QueueConsumer;
pub use retry::{with_retry, RetryPolicy};
pub use worker::{ExpenseWorker, WorkerConfig, WorkerDeps};
