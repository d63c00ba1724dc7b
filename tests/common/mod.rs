// Shared test doubles for the integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use gst_ingest::sink::Clock;
use gst_ingest::storage::{ObjectStorage, StorageError};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Put {
    pub bucket: String,
    pub key: String,
    pub body: String,
    pub content_type: String,
}

/// Storage that records every upload and can be told to fail them.
#[derive(Default)]
pub struct RecordingStorage {
    puts: Mutex<Vec<Put>>,
    fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingStorage {
    pub fn failing() -> Self {
        let storage = Self::default();
        storage.fail.store(true, Ordering::SeqCst);
        storage
    }

    pub fn puts(&self) -> Vec<Put> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.puts.lock().unwrap().push(Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
            content_type: content_type.to_string(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Configuration("access denied".to_string()));
        }
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        Err(StorageError::NotFound { bucket: bucket.to_string(), key: key.to_string() })
    }
}

/// 2025-02-18 10:45:30 UTC on the first call, one second later on each
/// following call.
#[allow(dead_code)]
pub fn ticking_clock() -> Clock {
    let base: DateTime<Utc> = Utc.with_ymd_and_hms(2025, 2, 18, 10, 45, 30).unwrap();
    let calls = Arc::new(AtomicI64::new(0));
    Arc::new(move || base + Duration::seconds(calls.fetch_add(1, Ordering::SeqCst)))
}
