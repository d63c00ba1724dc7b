use crate::storage::{ObjectStorage, StorageError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Content type of saved data objects.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Key of the app-id list the Steam jobs iterate over.
pub const APP_IDS_KEY: &str = "data/raw/steam/app-list/appids.json";

/// Error type for saving and loading data objects.
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid JSON in {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize data: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid app-id list: expected a JSON array of objects")]
    InvalidAppList,
}

/// Reads and writes JSON payloads in one bucket.
#[derive(Clone)]
pub struct DataStore {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl DataStore {
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: impl Into<String>) -> Self {
        DataStore { storage, bucket: bucket.into() }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Write `data` as 4-space indented JSON under `key`.
    pub async fn save_json<T>(&self, key: &str, data: &T) -> Result<(), DataError>
    where
        T: Serialize + ?Sized,
    {
        let body = to_pretty_json(data).map_err(DataError::Serialize)?;
        self.storage
            .put_object(&self.bucket, key, Bytes::from(body), JSON_CONTENT_TYPE)
            .await?;
        tracing::info!(key, bucket = %self.bucket, "saved data object");
        Ok(())
    }

    pub async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, DataError> {
        let body = self.storage.get_object(&self.bucket, key).await?;
        serde_json::from_slice(&body).map_err(|source| DataError::Json { key: key.to_string(), source })
    }

    /// Load the app-id list stored at `key`. See [`parse_app_ids`].
    pub async fn load_app_ids(&self, key: &str) -> Result<Vec<u64>, DataError> {
        let value: serde_json::Value = self.load_json(key).await?;
        let ids = parse_app_ids(&value)?;
        tracing::info!(key, count = ids.len(), "loaded app ids");
        Ok(ids)
    }
}

/// Extract ids from `[{"appid": 10, ...}, ...]`.
///
/// Entries without a numeric `appid` are skipped; a document that is not
/// an array is rejected.
pub fn parse_app_ids(value: &serde_json::Value) -> Result<Vec<u64>, DataError> {
    let entries = value.as_array().ok_or(DataError::InvalidAppList)?;
    Ok(entries
        .iter()
        .filter_map(|entry| entry.get("appid"))
        .filter_map(|id| id.as_u64())
        .collect())
}

fn to_pretty_json<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    data.serialize(&mut serializer)?;
    Ok(out)
}
