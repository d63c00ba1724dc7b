use async_trait::async_trait;
use bytes::Bytes;

/// Object storage capability used by the log sink and the jobs.
///
/// Implementations address objects by `(bucket, key)`. The trait is the
/// seam tests use to observe or fail uploads without a real backend.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Verify that `bucket` is reachable with the configured credentials.
    ///
    /// Called once when a sink is built so that a broken endpoint fails
    /// construction instead of the first flush. Default is a no-op.
    async fn check(&self, _bucket: &str) -> Result<(), StorageError> {
        Ok(())
    }

    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Fetch the full contents of `key`.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;
}

/// Errors surfaced by [`ObjectStorage`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("invalid object key {key:?}: {message}")]
    InvalidKey { key: String, message: String },

    #[error("storage configuration error: {0}")]
    Configuration(String),

    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
