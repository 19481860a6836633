//! Work queue provider trait

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::QueueMessage;

/// Options for a single receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Long-poll limit; zero returns immediately
    pub wait_time: Duration,
    /// How long the received message stays hidden from other consumers
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(3),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

/// At-least-once message queue with visibility timeouts
///
/// Implementations:
/// - `SqliteQueue`: durable queue in a local SQLite file
/// - `SqsQueue`: Amazon SQS (feature `aws`)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Receive at most one message, waiting up to `options.wait_time`.
    ///
    /// A received message is hidden for `options.visibility_timeout` and
    /// comes back with a higher `receive_count` unless deleted first.
    async fn receive(&self, queue: &str, options: ReceiveOptions) -> Result<Option<QueueMessage>>;

    /// Delete a received message by its receipt handle
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()>;

    /// Enqueue a message body, returning the new message id
    async fn send(&self, queue: &str, body: &str) -> Result<String>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
