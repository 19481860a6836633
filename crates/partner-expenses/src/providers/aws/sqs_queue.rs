//! Amazon SQS work queue

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use aws_sdk_sqs::Client;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::config::{QueueConfig, SQS_MAX_VISIBILITY_SECS, SQS_MAX_WAIT_SECS};
use crate::error::{Error, Result};
use crate::providers::queue::{QueueProvider, ReceiveOptions};
use crate::types::QueueMessage;

/// Queue provider over SQS, addressing queues by name
pub struct SqsQueue {
    client: Client,
    /// Queue name to URL
    urls: Mutex<HashMap<String, String>>,
}

impl SqsQueue {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            urls: Mutex::new(HashMap::new()),
        }
    }

    pub async fn from_config(config: &QueueConfig) -> Self {
        let sdk_config = super::load_sdk_config(&config.region, None).await;
        tracing::info!("SQS queue client ready (region {})", config.region);
        Self::new(Client::new(&sdk_config))
    }

    async fn queue_url(&self, queue: &str) -> Result<String> {
        if let Some(url) = self.urls.lock().get(queue) {
            return Ok(url.clone());
        }

        let output = self
            .client
            .get_queue_url()
            .queue_name(queue)
            .send()
            .await
            .map_err(|e| Error::queue(format!("get_queue_url({}): {}", queue, DisplayErrorContext(&e))))?;

        let url = output
            .queue_url()
            .ok_or_else(|| Error::queue(format!("SQS returned no URL for queue '{}'", queue)))?
            .to_string();

        self.urls.lock().insert(queue.to_string(), url.clone());
        Ok(url)
    }
}

#[async_trait]
impl QueueProvider for SqsQueue {
    async fn receive(&self, queue: &str, options: ReceiveOptions) -> Result<Option<QueueMessage>> {
        let wait_secs = options.wait_time.as_secs();
        let visibility_secs = options.visibility_timeout.as_secs();
        if wait_secs > SQS_MAX_WAIT_SECS || visibility_secs > SQS_MAX_VISIBILITY_SECS {
            return Err(Error::Config(format!(
                "SQS accepts at most {}s wait and {}s visibility, got {}s and {}s",
                SQS_MAX_WAIT_SECS, SQS_MAX_VISIBILITY_SECS, wait_secs, visibility_secs
            )));
        }

        let url = self.queue_url(queue).await?;

        let output = self
            .client
            .receive_message()
            .queue_url(&url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_secs as i32)
            .visibility_timeout(visibility_secs as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| Error::queue(format!("receive_message({}): {}", queue, DisplayErrorContext(&e))))?;

        let Some(message) = output.messages().first() else {
            return Ok(None);
        };

        let receipt_handle = message
            .receipt_handle()
            .ok_or_else(|| Error::queue("SQS message has no receipt handle"))?
            .to_string();

        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Ok(Some(QueueMessage {
            message_id: message.message_id().unwrap_or_default().to_string(),
            body: message.body().unwrap_or_default().to_string(),
            receipt_handle,
            receive_count,
        }))
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        let url = self.queue_url(queue).await?;
        self.client
            .delete_message()
            .queue_url(&url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| Error::queue(format!("delete_message({}): {}", queue, DisplayErrorContext(&e))))?;
        Ok(())
    }

    async fn send(&self, queue: &str, body: &str) -> Result<String> {
        let url = self.queue_url(queue).await?;
        let output = self
            .client
            .send_message()
            .queue_url(&url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| Error::queue(format!("send_message({}): {}", queue, DisplayErrorContext(&e))))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }

    fn name(&self) -> &str {
        "sqs"
    }
}
