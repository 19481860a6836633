//! Object store provider trait for fetching stored partner files

use async_trait::async_trait;

use crate::error::Result;

/// Read access to stored files
///
/// Implementations:
/// - `LocalObjectStore`: directory tree on the local filesystem
/// - `S3ObjectStore`: Amazon S3 or a compatible store (feature `aws`)
#[async_trait]
pub trait ObjectStoreProvider: Send + Sync {
    /// Fetch the full contents of `bucket/key`.
    ///
    /// Fails with `ObjectNotFound` when the key does not exist and
    /// `AccessDenied` when the caller may not read it. Other failures are
    /// reported as transient.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
