//! Durable work queue in SQLite
//!
//! Gives a local deployment the same at-least-once contract as SQS: received
//! messages are hidden for a visibility timeout and reappear unless deleted
//! with the receipt handle of their latest delivery.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::providers::queue::{QueueProvider, ReceiveOptions};
use crate::types::QueueMessage;

/// SQLite-backed queue provider. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteQueue {
    /// Create or open the queue database at the given path
    pub fn new<P: AsRef<Path>>(path: P, poll_interval: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open queue database: {}", e)))?;

        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        };

        queue.migrate()?;
        Ok(queue)
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        Self::new(&config.sqlite_path, config.poll_interval())
    }

    /// Create an in-memory queue (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory queue: {}", e)))?;

        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval: Duration::from_millis(10),
        };

        queue.migrate()?;
        Ok(queue)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;

            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                message_id TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL,
                receipt_handle TEXT,
                receive_count INTEGER NOT NULL DEFAULT 0,
                -- Unix millis at which the message may be received again
                visible_at INTEGER NOT NULL,
                sent_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queue_messages_visible ON queue_messages(queue, visible_at);
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to run queue migrations: {}", e)))?;

        Ok(())
    }

    /// Enqueue a body, visible immediately
    pub fn send_now(&self, queue: &str, body: &str) -> Result<String> {
        let conn = self.conn.lock();
        let message_id = Uuid::new_v4().to_string();

        conn.execute(
            r#"
            INSERT INTO queue_messages (queue, message_id, body, visible_at, sent_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![queue, message_id, body, now_millis(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::queue(format!("Failed to send to '{}': {}", queue, e)))?;

        Ok(message_id)
    }

    /// Claim the oldest visible message, if any
    pub fn try_receive(&self, queue: &str, visibility_timeout: Duration) -> Result<Option<QueueMessage>> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::queue(format!("Failed to lock queue '{}': {}", queue, e)))?;

        let now = now_millis();
        let candidate: Option<(i64, String, String, u32)> = tx
            .query_row(
                r#"
                SELECT id, message_id, body, receive_count FROM queue_messages
                WHERE queue = ?1 AND visible_at <= ?2
                ORDER BY id LIMIT 1
                "#,
                params![queue, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| Error::queue(format!("Failed to read queue '{}': {}", queue, e)))?;

        let Some((id, message_id, body, previous_count)) = candidate else {
            return Ok(None);
        };

        let receipt_handle = Uuid::new_v4().to_string();
        let receive_count = previous_count + 1;
        let hidden_until = now + visibility_timeout.as_millis() as i64;

        tx.execute(
            "UPDATE queue_messages SET receipt_handle = ?1, receive_count = ?2, visible_at = ?3 WHERE id = ?4",
            params![receipt_handle, receive_count, hidden_until, id],
        )
        .map_err(|e| Error::queue(format!("Failed to claim message {}: {}", message_id, e)))?;

        tx.commit()
            .map_err(|e| Error::queue(format!("Failed to claim message {}: {}", message_id, e)))?;

        Ok(Some(QueueMessage {
            message_id,
            body,
            receipt_handle,
            receive_count,
        }))
    }

    /// Delete by the receipt handle of the latest delivery
    pub fn delete_now(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        let conn = self.conn.lock();

        let deleted = conn
            .execute(
                "DELETE FROM queue_messages WHERE queue = ?1 AND receipt_handle = ?2",
                params![queue, receipt_handle],
            )
            .map_err(|e| Error::queue(format!("Failed to delete from '{}': {}", queue, e)))?;

        if deleted == 0 {
            return Err(Error::queue(format!(
                "receipt handle {} is stale or unknown on '{}'",
                receipt_handle, queue
            )));
        }

        Ok(())
    }

    /// Messages on a queue, visible or in flight
    pub fn depth(&self, queue: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
                params![queue],
                |row| row.get(0),
            )
            .map_err(|e| Error::queue(format!("Failed to count '{}': {}", queue, e)))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl QueueProvider for SqliteQueue {
    async fn receive(&self, queue: &str, options: ReceiveOptions) -> Result<Option<QueueMessage>> {
        let deadline = Instant::now() + options.wait_time;

        loop {
            let this = self.clone();
            let name = queue.to_string();
            let received = tokio::task::spawn_blocking(move || this.try_receive(&name, options.visibility_timeout))
                .await
                .map_err(|e| Error::Internal(format!("Task join error: {}", e)))??;

            if received.is_some() {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        let this = self.clone();
        let queue = queue.to_string();
        let receipt_handle = receipt_handle.to_string();
        tokio::task::spawn_blocking(move || this.delete_now(&queue, &receipt_handle))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    async fn send(&self, queue: &str, body: &str) -> Result<String> {
        let this = self.clone();
        let queue = queue.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || this.send_now(&queue, &body))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    fn name(&self) -> &str {
        "sqlite-queue"
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(visibility_ms: u64) -> ReceiveOptions {
        ReceiveOptions {
            wait_time: Duration::ZERO,
            visibility_timeout: Duration::from_millis(visibility_ms),
        }
    }

    #[tokio::test]
    async fn test_receive_in_send_order() {
        let queue = SqliteQueue::in_memory().unwrap();
        let first = queue.send("files", "one").await.unwrap();
        queue.send("files", "two").await.unwrap();
        queue.send("other", "elsewhere").await.unwrap();

        let message = queue.receive("files", options(60_000)).await.unwrap().unwrap();
        assert_eq!(message.message_id, first);
        assert_eq!(message.body, "one");
        assert_eq!(message.receive_count, 1);

        let message = queue.receive("files", options(60_000)).await.unwrap().unwrap();
        assert_eq!(message.body, "two");

        // Both are in flight
        assert!(queue.receive("files", options(60_000)).await.unwrap().is_none());
        assert_eq!(queue.depth("files").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_undeleted_message_is_redelivered() {
        let queue = SqliteQueue::in_memory().unwrap();
        queue.send("files", "body").await.unwrap();

        let first = queue.receive("files", options(30)).await.unwrap().unwrap();
        assert!(queue.receive("files", options(30)).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;

        let second = queue.receive("files", options(30)).await.unwrap().unwrap();
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.receive_count, 2);
        assert_ne!(second.receipt_handle, first.receipt_handle);
    }

    #[tokio::test]
    async fn test_delete_needs_current_receipt_handle() {
        let queue = SqliteQueue::in_memory().unwrap();
        queue.send("files", "body").await.unwrap();

        let first = queue.receive("files", options(10)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = queue.receive("files", options(60_000)).await.unwrap().unwrap();

        let err = queue.delete("files", &first.receipt_handle).await.unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
        assert_eq!(queue.depth("files").unwrap(), 1);

        queue.delete("files", &second.receipt_handle).await.unwrap();
        assert_eq!(queue.depth("files").unwrap(), 0);

        // Deleting twice fails the second time
        assert!(queue.delete("files", &second.receipt_handle).await.is_err());
    }

    #[tokio::test]
    async fn test_long_poll_waits_for_a_message() {
        let queue = SqliteQueue::in_memory().unwrap();
        let sender = queue.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            sender.send("files", "late").await.unwrap();
        });

        let opts = ReceiveOptions {
            wait_time: Duration::from_secs(2),
            visibility_timeout: Duration::from_secs(30),
        };
        let message = queue.receive("files", opts).await.unwrap().unwrap();
        assert_eq!(message.body, "late");
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none_after_wait() {
        let queue = SqliteQueue::in_memory().unwrap();
        let opts = ReceiveOptions {
            wait_time: Duration::from_millis(30),
            visibility_timeout: Duration::from_secs(30),
        };

        let started = Instant::now();
        assert!(queue.receive("files", opts).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_file_backed_queue_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("queue.db");

        let queue = SqliteQueue::new(&path, Duration::from_millis(10)).unwrap();
        queue.send_now("files", "persisted").unwrap();
        drop(queue);

        let reopened = SqliteQueue::new(&path, Duration::from_millis(10)).unwrap();
        let message = reopened.try_receive("files", Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(message.body, "persisted");
    }
}
