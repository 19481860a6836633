//! Amazon S3 object store

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;

use crate::config::ObjectStoreConfig;
use crate::error::{Error, Result};
use crate::providers::object_store::ObjectStoreProvider;

/// Object store over S3 or an S3-compatible endpoint
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from config using the default credential chain.
    ///
    /// Custom endpoints get path-style addressing, which most S3-compatible
    /// stores require.
    pub async fn from_config(config: &ObjectStoreConfig) -> Self {
        let sdk_config = super::load_sdk_config(&config.region, config.endpoint_url.as_deref()).await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();

        tracing::info!(
            "S3 object store ready (region {}, endpoint {})",
            config.region,
            config.endpoint_url.as_deref().unwrap_or("default")
        );

        Self::new(Client::from_conf(s3_config))
    }
}

#[async_trait]
impl ObjectStoreProvider for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                if status == Some(403) {
                    return Err(Error::AccessDenied(format!("s3://{}/{}", bucket, key)));
                }

                let detail = DisplayErrorContext(&e).to_string();
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() || status == Some(404) {
                    return Err(Error::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }

                return Err(Error::transient(format!(
                    "S3 get_object s3://{}/{} failed: {}",
                    bucket, key, detail
                )));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::transient(format!("S3 body read for s3://{}/{} failed: {}", bucket, key, e)))?
            .into_bytes()
            .to_vec();

        tracing::debug!("Fetched {} bytes from s3://{}/{}", data.len(), bucket, key);
        Ok(data)
    }

    fn name(&self) -> &str {
        "s3"
    }
}
