//! Local object store using the filesystem
//!
//! Buckets are directories under a root; keys are relative paths inside them.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::config::ObjectStoreConfig;
use crate::error::{Error, Result};

use super::object_store::ObjectStoreProvider;

/// Object store backed by `root/<bucket>/<key>` on disk
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        Self::new(config.local_root.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an object, creating parent directories
    pub async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// Map bucket and key to a path, refusing anything that escapes the root
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let contained = |part: &str| {
            !part.is_empty() && Path::new(part).components().all(|c| matches!(c, Component::Normal(_)))
        };

        if !contained(bucket) || bucket.contains('/') {
            return Err(Error::AccessDenied(format!("invalid bucket name '{}'", bucket)));
        }
        if !contained(key) {
            return Err(Error::AccessDenied(format!(
                "key '{}' is outside bucket '{}'",
                key, bucket
            )));
        }

        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStoreProvider for LocalObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        let not_found = || Error::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        if path.is_dir() {
            return Err(not_found());
        }

        match tokio::fs::read(&path).await {
            Ok(data) => {
                tracing::debug!("Read {} bytes from {}", data.len(), path.display());
                Ok(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(Error::AccessDenied(format!(
                "{}/{}: {}",
                bucket, key, e
            ))),
            Err(e) => Err(Error::transient(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "local-filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_dir, store) = store();
        store
            .put_object("expenses", "partners/p1/march.csv", b"a,b\n")
            .await
            .unwrap();

        let data = store.get_object("expenses", "partners/p1/march.csv").await.unwrap();
        assert_eq!(data, b"a,b\n");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let (_dir, store) = store();
        let err = store.get_object("expenses", "nope.csv").await.unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound { .. }));

        // A directory is not an object
        store.put_object("expenses", "dir/file.csv", b"x").await.unwrap();
        let err = store.get_object("expenses", "dir").await.unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rejects_keys_escaping_the_bucket() {
        let (_dir, store) = store();
        for key in ["../other/secret.csv", "/etc/passwd", "a/../../b.csv", ""] {
            let err = store.get_object("expenses", key).await.unwrap_err();
            assert!(matches!(err, Error::AccessDenied(_)), "key {key:?} gave {err:?}");
        }

        let err = store.get_object("..", "x.csv").await.unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }
}
