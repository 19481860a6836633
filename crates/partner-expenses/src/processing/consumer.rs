//! Queue consumer: receive, acknowledge and dead-letter file messages

use std::sync::Arc;

use crate::error::Result;
use crate::providers::queue::{QueueProvider, ReceiveOptions};
use crate::types::QueueMessage;

/// Thin policy layer over a [`QueueProvider`]
#[derive(Clone)]
pub struct QueueConsumer {
    queue: Arc<dyn QueueProvider>,
    options: ReceiveOptions,
    dead_letter_queue: String,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn QueueProvider>, options: ReceiveOptions, dead_letter_queue: impl Into<String>) -> Self {
        Self {
            queue,
            options,
            dead_letter_queue: dead_letter_queue.into(),
        }
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }

    /// Receive one message, long-polling up to the configured wait time
    pub async fn receive_next(&self, queue_name: &str) -> Result<Option<QueueMessage>> {
        let message = self.queue.receive(queue_name, self.options).await?;

        if let Some(message) = &message {
            tracing::debug!(
                "Received message {} from {} (delivery {})",
                message.message_id,
                queue_name,
                message.receive_count
            );
        }

        Ok(message)
    }

    /// Delete a message once its file is fully processed
    pub async fn ack(&self, queue_name: &str, message: &QueueMessage) -> Result<()> {
        self.queue.delete(queue_name, &message.receipt_handle).await?;
        tracing::debug!("Deleted message {} from {}", message.message_id, queue_name);
        Ok(())
    }

    /// Move a message to the dead-letter queue.
    ///
    /// The body is copied unchanged so the message can be redriven later. The
    /// original is deleted only after the copy is sent.
    pub async fn dead_letter(&self, queue_name: &str, message: &QueueMessage, reason: &str) -> Result<()> {
        let dead_letter_id = self.queue.send(&self.dead_letter_queue, &message.body).await?;
        self.queue.delete(queue_name, &message.receipt_handle).await?;

        tracing::warn!(
            "Message {} moved to {} as {} after {} deliveries: {}",
            message.message_id,
            self.dead_letter_queue,
            dead_letter_id,
            message.receive_count,
            reason
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteQueue;
    use std::time::Duration;

    fn consumer(queue: &SqliteQueue) -> QueueConsumer {
        let options = ReceiveOptions {
            wait_time: Duration::ZERO,
            visibility_timeout: Duration::from_secs(30),
        };
        QueueConsumer::new(Arc::new(queue.clone()), options, "files-dead-letter")
    }

    #[tokio::test]
    async fn test_ack_removes_the_message() {
        let queue = SqliteQueue::in_memory().unwrap();
        let consumer = consumer(&queue);
        queue.send_now("files", "{}").unwrap();

        let message = consumer.receive_next("files").await.unwrap().unwrap();
        consumer.ack("files", &message).await.unwrap();

        assert_eq!(queue.depth("files").unwrap(), 0);
        assert!(consumer.receive_next("files").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_moves_the_body() {
        let queue = SqliteQueue::in_memory().unwrap();
        let consumer = consumer(&queue);
        queue.send_now("files", r#"{"name":"a.pdf","path":"a.pdf"}"#).unwrap();

        let message = consumer.receive_next("files").await.unwrap().unwrap();
        consumer.dead_letter("files", &message, "unsupported").await.unwrap();

        assert_eq!(queue.depth("files").unwrap(), 0);
        let moved = queue
            .try_receive("files-dead-letter", Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(moved.body, message.body);
    }
}
