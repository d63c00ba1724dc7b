//! [`ObjectStorage`] backed by the `object_store` crate.
//!
//! One `ObjectStoreStorage` can address several buckets; a concrete
//! `object_store` client is built lazily the first time a bucket is used
//! and cached afterwards.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};

#[cfg(feature = "s3")]
use crate::config::StorageConfig;
use crate::storage::{ObjectStorage, StorageError};

/// Key probed by [`ObjectStorage::check`]. It does not need to exist.
const PROBE_KEY: &str = "logs/.probe";

#[derive(Clone, Debug)]
enum Backend {
    #[cfg(feature = "s3")]
    S3Compatible(StorageConfig),
    /// Each bucket is a subdirectory of the root.
    Local(PathBuf),
    Memory,
}

pub struct ObjectStoreStorage {
    backend: Backend,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreStorage {
    fn with_backend(backend: Backend) -> Self {
        ObjectStoreStorage { backend, stores: Mutex::new(HashMap::new()) }
    }

    /// S3-compatible store (MinIO, AWS) using path-style requests.
    #[cfg(feature = "s3")]
    pub fn s3_compatible(config: StorageConfig) -> Self {
        Self::with_backend(Backend::S3Compatible(config))
    }

    /// Objects are written as files under `root/{bucket}/{key}`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::with_backend(Backend::Local(root.into()))
    }

    /// Process-local store, mainly for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::with_backend(Backend::Memory)
    }

    /// Local files cannot carry a content type; other backends store it.
    fn keeps_content_type(&self) -> bool {
        !matches!(self.backend, Backend::Local(_))
    }

    async fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Configuration("bucket name is empty".to_string()));
        }

        let cached = self.cache()?.get(bucket).map(Arc::clone);
        if let Some(store) = cached {
            return Ok(store);
        }

        // Built without the lock held; a racing caller's store wins.
        let store = self.build_store(bucket).await?;
        let mut stores = self.cache()?;
        Ok(Arc::clone(stores.entry(bucket.to_string()).or_insert(store)))
    }

    fn cache(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<dyn ObjectStore>>>, StorageError> {
        self.stores
            .lock()
            .map_err(|_| StorageError::Configuration("store cache poisoned".to_string()))
    }

    async fn build_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        match &self.backend {
            #[cfg(feature = "s3")]
            Backend::S3Compatible(config) => {
                use object_store::aws::AmazonS3Builder;

                let store = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_endpoint(&config.endpoint)
                    .with_region(&config.region)
                    .with_access_key_id(&config.access_key)
                    .with_secret_access_key(&config.secret_key)
                    .with_virtual_hosted_style_request(false)
                    .with_allow_http(config.allow_http)
                    .build()?;
                Ok(Arc::new(store))
            }
            Backend::Local(root) => {
                let dir = root.join(bucket);
                tokio::fs::create_dir_all(&dir).await?;
                Ok(Arc::new(LocalFileSystem::new_with_prefix(dir)?))
            }
            Backend::Memory => Ok(Arc::new(InMemory::new())),
        }
    }
}

fn parse_key(key: &str) -> Result<Path, StorageError> {
    Path::parse(key).map_err(|e| StorageError::InvalidKey {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn check(&self, bucket: &str) -> Result<(), StorageError> {
        let store = self.store_for(bucket).await?;
        match store.head(&Path::from(PROBE_KEY)).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let store = self.store_for(bucket).await?;
        let location = parse_key(key)?;

        let mut attributes = Attributes::new();
        if self.keeps_content_type() {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let options = PutOptions { attributes, ..Default::default() };

        store.put_opts(&location, body.into(), options).await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let store = self.store_for(bucket).await?;
        let location = parse_key(key)?;

        match store.get(&location).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_buckets_are_isolated() {
        let storage = ObjectStoreStorage::in_memory();
        storage
            .put_object("gst", "logs/a.log", Bytes::from_static(b"hello\n"), "text/plain")
            .await
            .unwrap();

        let body = storage.get_object("gst", "logs/a.log").await.unwrap();
        assert_eq!(&body[..], b"hello\n");

        let err = storage.get_object("other", "logs/a.log").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn local_backend_writes_under_bucket_directory() {
        let root = tempfile::tempdir().unwrap();
        let storage = ObjectStoreStorage::local(root.path());
        storage.check("gst").await.unwrap();

        storage
            .put_object("gst", "data/x/y.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();

        let on_disk = std::fs::read(root.path().join("gst/data/x/y.json")).unwrap();
        assert_eq!(on_disk, b"{}");
        assert_eq!(&storage.get_object("gst", "data/x/y.json").await.unwrap()[..], b"{}");
    }

    #[tokio::test]
    async fn local_backend_creates_a_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("not/yet/there");
        let storage = ObjectStoreStorage::local(&root);

        storage.check("gst").await.unwrap();
        assert!(root.join("gst").is_dir());

        storage
            .put_object("gst", "logs/a.log", Bytes::from_static(b"a\n"), "text/plain")
            .await
            .unwrap();
        assert_eq!(std::fs::read(root.join("gst/logs/a.log")).unwrap(), b"a\n");
    }

    #[tokio::test]
    async fn empty_bucket_and_bad_keys_are_rejected() {
        let storage = ObjectStoreStorage::in_memory();
        assert!(matches!(
            storage.check("").await,
            Err(StorageError::Configuration(_))
        ));
        assert!(matches!(
            storage.get_object("gst", "a//b").await,
            Err(StorageError::InvalidKey { .. })
        ));
    }
}
