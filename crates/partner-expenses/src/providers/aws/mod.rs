//! AWS backends: S3 for partner files, SQS for work messages

mod s3_store;
mod sqs_queue;

pub use s3_store::S3ObjectStore;
pub use sqs_queue::SqsQueue;

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Shared SDK configuration from the default credential chain
pub async fn load_sdk_config(region: &str, endpoint_url: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
    if let Some(url) = endpoint_url {
        loader = loader.endpoint_url(url);
    }
    loader.load().await
}
