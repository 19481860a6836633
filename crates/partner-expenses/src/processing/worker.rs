//! Queue-driven worker: receive → fetch → parse → persist → acknowledge

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::{IngestConfig, ParsingConfig};
use crate::error::{Error, Result};
use crate::ingestion::{object_key, Dispatcher};
use crate::providers::{ExpenseStore, ObjectStoreProvider, QueueProvider, ReceiveOptions, SourceInfo};
use crate::types::{FilePayload, FileReference, FileType, Outcome, ProcessingSummary, QueueMessage};

use super::consumer::QueueConsumer;
use super::retry::{with_retry, RetryPolicy};

/// Clients the worker talks to
#[derive(Clone)]
pub struct WorkerDeps {
    pub object_store: Arc<dyn ObjectStoreProvider>,
    pub queue: Arc<dyn QueueProvider>,
    pub store: Arc<dyn ExpenseStore>,
}

/// Worker settings, resolved from [`IngestConfig`]
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bucket holding partner files
    pub bucket: String,
    pub queue_name: String,
    pub dead_letter_queue: String,
    pub receive: ReceiveOptions,
    /// Deliveries before a retryable failure is dead-lettered
    pub max_receive_count: u32,
    pub fetch_retry: RetryPolicy,
    /// Limit for parsing one file
    pub parse_timeout: Duration,
    pub store_retry: RetryPolicy,
    pub parsing: ParsingConfig,
    /// Pause after a queue error before polling again
    pub error_backoff: Duration,
}

impl WorkerConfig {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            bucket: config.object_store.bucket.clone(),
            queue_name: config.queue.queue_name.clone(),
            dead_letter_queue: config.queue.dead_letter_name(),
            receive: ReceiveOptions {
                wait_time: config.queue.wait_time(),
                visibility_timeout: config.queue.visibility_timeout(),
            },
            max_receive_count: config.queue.max_receive_count,
            fetch_retry: config.retry.fetch.policy(),
            parse_timeout: config.parsing.timeout(),
            store_retry: config.retry.store.policy(),
            parsing: config.parsing.clone(),
            error_backoff: Duration::from_secs(1),
        }
    }

    /// Longest a single message can take before its outcome is known
    pub fn processing_budget(&self) -> Duration {
        self.fetch_retry.worst_case() + self.parse_timeout + self.store_retry.worst_case()
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_name.trim().is_empty() {
            return Err(Error::Config("queue name must not be empty".to_string()));
        }
        if self.dead_letter_queue == self.queue_name {
            return Err(Error::Config("dead-letter queue must differ from the work queue".to_string()));
        }
        if self.max_receive_count == 0 {
            return Err(Error::Config("max_receive_count must be at least 1".to_string()));
        }

        // Otherwise a second worker receives the message while the first still holds it
        let budget = self.processing_budget();
        if self.receive.visibility_timeout <= budget {
            return Err(Error::Config(format!(
                "visibility timeout {:.1}s must exceed the processing budget {:.1}s",
                self.receive.visibility_timeout.as_secs_f64(),
                budget.as_secs_f64()
            )));
        }

        Ok(())
    }
}

/// Processes expense file messages one at a time
pub struct ExpenseWorker {
    consumer: QueueConsumer,
    object_store: Arc<dyn ObjectStoreProvider>,
    store: Arc<dyn ExpenseStore>,
    dispatcher: Dispatcher,
    config: WorkerConfig,
}

impl ExpenseWorker {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            "Worker configured: queue {} (dead letter {}), object store {}, expense store {}, visibility {}s",
            config.queue_name,
            config.dead_letter_queue,
            deps.object_store.name(),
            deps.store.name(),
            config.receive.visibility_timeout.as_secs()
        );

        Ok(Self {
            consumer: QueueConsumer::new(deps.queue, config.receive, config.dead_letter_queue.clone()),
            object_store: deps.object_store,
            store: deps.store,
            dispatcher: Dispatcher::new(&config.parsing),
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Receive and process at most one message
    pub async fn process_next(&self) -> Result<Option<ProcessingSummary>> {
        let Some(message) = self.consumer.receive_next(&self.config.queue_name).await? else {
            return Ok(None);
        };

        Ok(Some(self.process_message(&message).await))
    }

    /// Process one delivery and decide its fate.
    ///
    /// The message is deleted only after its records are persisted. Permanent
    /// errors are dead-lettered at once; retryable ones leave the message for
    /// redelivery until `max_receive_count` deliveries have failed.
    pub async fn process_message(&self, message: &QueueMessage) -> ProcessingSummary {
        let started = Instant::now();
        let mut summary = ProcessingSummary::new(&message.message_id, message.receive_count);
        let queue = &self.config.queue_name;

        let outcome = match self.ingest(message, &mut summary).await {
            Ok(()) => match self.consumer.ack(queue, message).await {
                Ok(()) => Outcome::Completed,
                Err(e) => {
                    // Records are saved; the redelivery will find them as duplicates
                    tracing::warn!("[{}] saved but not deleted: {}", summary.source_key, e);
                    summary.error = Some(format!("{}: {}", e.kind(), e));
                    Outcome::Retrying
                }
            },
            Err(e) => {
                summary.error = Some(format!("{}: {}", e.kind(), e));
                self.handle_failure(message, &summary.source_key, &e).await
            }
        };
        summary.outcome = outcome;

        summary.duration_ms = started.elapsed().as_millis() as u64;
        summary.finished_at = Utc::now();

        if let Err(e) = self.store.record_run(&summary).await {
            tracing::warn!("Failed to record run for message {}: {}", message.message_id, e);
        }

        match summary.outcome {
            Outcome::Completed => tracing::info!(
                "[{}] completed in {}ms: {} saved, {} duplicate, {} row errors, {} store failures",
                summary.source_key,
                summary.duration_ms,
                summary.records_saved,
                summary.duplicates_skipped,
                summary.row_errors,
                summary.store_failures
            ),
            outcome => tracing::warn!(
                "[{}] {} (delivery {}): {}",
                summary.source_key,
                outcome,
                message.receive_count,
                summary.error.as_deref().unwrap_or("unknown error")
            ),
        }

        summary
    }

    /// Poll and process until `shutdown` turns true. Stops between messages.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Expense worker started on queue {}", self.config.queue_name);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.consumer.receive_next(&self.config.queue_name) => received,
            };

            match received {
                Ok(Some(message)) => {
                    self.process_message(&message).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Receive from {} failed: {}", self.config.queue_name, e);
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Expense worker stopped");
    }

    async fn handle_failure(&self, message: &QueueMessage, source_key: &str, error: &Error) -> Outcome {
        let exhausted = message.receive_count >= self.config.max_receive_count;

        if !error.is_permanent() && !exhausted {
            tracing::warn!(
                "[{}] delivery {}/{} failed, leaving for redelivery: {}",
                source_key,
                message.receive_count,
                self.config.max_receive_count,
                error
            );
            return Outcome::Retrying;
        }

        let reason = if error.is_permanent() {
            error.to_string()
        } else {
            format!("gave up after {} deliveries: {}", message.receive_count, error)
        };

        match self.consumer.dead_letter(&self.config.queue_name, message, &reason).await {
            Ok(()) => Outcome::DeadLettered,
            Err(e) => {
                tracing::error!("[{}] dead-lettering message {} failed: {}", source_key, message.message_id, e);
                Outcome::Retrying
            }
        }
    }

    /// Fetch, parse and persist the file a message names
    async fn ingest(&self, message: &QueueMessage, summary: &mut ProcessingSummary) -> Result<()> {
        let payload = FilePayload::from_body(&message.body)?;
        let key = object_key(&payload.path)?;
        let file_type = payload.resolved_file_type();
        summary.source_key = key.clone();
        summary.file_type = file_type.clone();

        // Reject unknown types before spending a fetch on them
        self.dispatcher.parser_for(&FileType::from_extension(&file_type))?;

        tracing::info!("[{}] processing {} (delivery {})", key, payload.name, message.receive_count);

        let data = self.fetch(&key).await?;
        let file_ref = FileReference::new(payload.name.clone(), key.clone(), data);
        tracing::debug!("[{}] fetched {} bytes, sha256 {}", key, file_ref.size(), file_ref.content_hash);

        let source = SourceInfo {
            key: key.clone(),
            name: payload.name.clone(),
            content_hash: file_ref.content_hash.clone(),
            file_type: file_type.clone(),
            delivery_id: format!("{}:{}", message.message_id, message.receive_count),
        };

        let dispatcher = self.dispatcher.clone();
        let parse = tokio::task::spawn_blocking(move || dispatcher.dispatch(&file_type, &file_ref));
        let parsed = match tokio::time::timeout(self.config.parse_timeout, parse).await {
            Ok(joined) => joined.map_err(|e| Error::Internal(format!("Task join error: {}", e)))??,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: format!("parse {}", key),
                    secs: self.config.parse_timeout.as_secs_f64(),
                })
            }
        };

        summary.records_parsed = parsed.records.len();
        summary.row_errors = parsed.errors.len();

        for row_error in parsed.errors.iter().take(10) {
            tracing::warn!("[{}] skipped {}", key, row_error);
        }
        if parsed.errors.len() > 10 {
            tracing::warn!("[{}] ... and {} more row errors", key, parsed.errors.len() - 10);
        }

        let records = Arc::new(parsed.records);
        let store = self.store.clone();
        let outcome = with_retry(&format!("persist {}", key), &self.config.store_retry, || {
            let store = store.clone();
            let source = source.clone();
            let records = records.clone();
            async move { store.save_batch(&source, &records).await }
        })
        .await?;

        summary.records_saved = outcome.inserted;
        summary.duplicates_skipped = outcome.duplicates;
        summary.store_failures = outcome.failures.len();

        for (record, reason) in &outcome.failures {
            tracing::warn!("[{}] row {} not stored: {}", key, record.row_number, reason);
        }

        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let object_store = self.object_store.clone();
        let bucket = self.config.bucket.clone();
        let owned_key = key.to_string();

        with_retry(&format!("fetch {}", key), &self.config.fetch_retry, || {
            let object_store = object_store.clone();
            let bucket = bucket.clone();
            let key = owned_key.clone();
            async move { object_store.get_object(&bucket, &key).await }
        })
        .await
        .map_err(|e| match e {
            Error::ObjectNotFound { bucket, key } => Error::SourceNotFound(format!("{}/{}", bucket, key)),
            other => other,
        })
    }
}
