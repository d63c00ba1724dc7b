use crate::fallback::{FallbackReporter, StderrFallback};
use crate::format::{LogFormatter, TextFormatter};
use crate::paths::log_object_key;
use crate::record::LogRecord;
use crate::storage::{ObjectStorage, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content type of every flushed log object.
pub const LOG_CONTENT_TYPE: &str = "text/plain";

/// Source of "now" for day partitions and flush timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Destination for [`LogRecord`]s produced by the logging layer.
///
/// The layer's background task is the only owner of a sink, so methods
/// take `&mut self` and never run concurrently with each other.
#[async_trait]
pub trait LogSink: Send {
    /// Accept one record. Must not fail; problems are handled internally.
    async fn send(&mut self, record: LogRecord);

    /// Persist anything buffered so far.
    ///
    /// Default implementation is a no-op for unbuffered sinks.
    async fn flush(&mut self) -> FlushOutcome {
        FlushOutcome::Empty
    }
}

/// Error returned when a [`BufferedLogSink`] cannot be constructed.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),

    #[error("log storage is not reachable: {0}")]
    Storage(#[from] StorageError),
}

/// What a sink does with a batch whose upload failed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FlushFailurePolicy {
    /// Drop the batch (at-most-once delivery).
    #[default]
    Discard,
    /// Try the upload a second time, then drop the batch.
    RetryOnce,
    /// Write the batch to `dir/{key}` on local disk.
    SpillToDisk(PathBuf),
}

/// Result of one flush attempt. A flush never fails from the caller's
/// point of view; this only says where the batch went.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered; no storage call was made.
    Empty,
    Uploaded { key: String, records: usize },
    Discarded { key: String, records: usize, error: String },
    Spilled { key: String, records: usize, path: PathBuf },
}

/// Fixed identity of a sink: where its objects go and how they are keyed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkIdentity {
    pub destination_bucket: String,
    /// Data domain being logged, e.g. `players`.
    pub category: String,
    /// UTC day captured once at construction.
    pub day_partition: NaiveDate,
}

impl SinkIdentity {
    pub fn new(
        destination_bucket: impl Into<String>,
        category: impl Into<String>,
        day_partition: NaiveDate,
    ) -> Result<Self, SinkError> {
        let destination_bucket = destination_bucket.into();
        let category = category.into();

        if destination_bucket.trim().is_empty() {
            return Err(SinkError::InvalidConfig("destination bucket is empty".to_string()));
        }
        if category.trim().is_empty() {
            return Err(SinkError::InvalidConfig("category is empty".to_string()));
        }
        if category.contains('/') {
            return Err(SinkError::InvalidConfig(format!(
                "category {:?} must not contain '/'",
                category
            )));
        }

        Ok(SinkIdentity { destination_bucket, category, day_partition })
    }
}

/// Formatted lines waiting for the next flush.
#[derive(Debug)]
pub struct LogRecordBuffer {
    formatted_lines: Vec<String>,
    capacity: usize,
}

impl LogRecordBuffer {
    pub fn new(capacity: usize) -> Result<Self, SinkError> {
        if capacity == 0 {
            return Err(SinkError::InvalidConfig("buffer size must be at least 1".to_string()));
        }
        Ok(LogRecordBuffer { formatted_lines: Vec::with_capacity(capacity.min(1024)), capacity })
    }

    pub fn push(&mut self, line: String) {
        self.formatted_lines.push(line);
    }

    pub fn pending_count(&self) -> usize {
        self.formatted_lines.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.formatted_lines.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.formatted_lines.len() >= self.capacity
    }

    /// Move all lines out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.formatted_lines)
    }
}

/// Log sink that batches formatted records in memory and writes each
/// batch as one text object once `capacity` records are pending.
pub struct BufferedLogSink {
    storage: Arc<dyn ObjectStorage>,
    identity: SinkIdentity,
    buffer: LogRecordBuffer,
    formatter: Arc<dyn LogFormatter>,
    on_flush_failure: FlushFailurePolicy,
    fallback: Arc<dyn FallbackReporter>,
    clock: Clock,
}

/// Builder for [`BufferedLogSink`]; see [`BufferedLogSink::builder`].
pub struct BufferedLogSinkBuilder {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    category: String,
    capacity: usize,
    day_partition: Option<NaiveDate>,
    formatter: Arc<dyn LogFormatter>,
    on_flush_failure: FlushFailurePolicy,
    fallback: Arc<dyn FallbackReporter>,
    clock: Clock,
}

impl BufferedLogSinkBuilder {
    pub fn formatter(mut self, formatter: Arc<dyn LogFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn on_flush_failure(mut self, policy: FlushFailurePolicy) -> Self {
        self.on_flush_failure = policy;
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn FallbackReporter>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Pin the day partition instead of deriving it from the clock.
    pub fn day_partition(mut self, day: NaiveDate) -> Self {
        self.day_partition = Some(day);
        self
    }

    /// Validate the configuration and probe the storage backend.
    ///
    /// **Returns**
    /// - `Err(SinkError::InvalidConfig)` for an empty bucket/category or a
    ///   zero buffer size.
    /// - `Err(SinkError::Storage)` when the bucket cannot be reached.
    pub async fn connect(self) -> Result<BufferedLogSink, SinkError> {
        let day = self.day_partition.unwrap_or_else(|| (self.clock)().date_naive());
        let identity = SinkIdentity::new(self.bucket, self.category, day)?;
        let buffer = LogRecordBuffer::new(self.capacity)?;

        self.storage.check(&identity.destination_bucket).await?;

        Ok(BufferedLogSink {
            storage: self.storage,
            identity,
            buffer,
            formatter: self.formatter,
            on_flush_failure: self.on_flush_failure,
            fallback: self.fallback,
            clock: self.clock,
        })
    }
}

impl BufferedLogSink {
    /// Start building a sink that writes into `bucket` under `category`.
    ///
    /// `capacity` is the flush threshold and has no default: jobs choose
    /// it explicitly.
    pub fn builder(
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        category: impl Into<String>,
        capacity: usize,
    ) -> BufferedLogSinkBuilder {
        BufferedLogSinkBuilder {
            storage,
            bucket: bucket.into(),
            category: category.into(),
            capacity,
            day_partition: None,
            formatter: Arc::new(TextFormatter),
            on_flush_failure: FlushFailurePolicy::default(),
            fallback: Arc::new(StderrFallback),
            clock: system_clock(),
        }
    }

    pub fn identity(&self) -> &SinkIdentity {
        &self.identity
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.pending_count()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Format and buffer one record, flushing when the buffer is full.
    ///
    /// Records that fail to format are dropped and reported through the
    /// fallback channel. Returns the flush outcome if one happened.
    pub async fn emit(&mut self, record: &LogRecord) -> Option<FlushOutcome> {
        match self.formatter.format(record) {
            Ok(line) => self.buffer.push(line),
            Err(e) => {
                self.fallback.report(&format!(
                    "dropping record from {} that could not be formatted: {}",
                    record.target, e
                ));
                return None;
            }
        }

        if self.buffer.is_full() {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Upload every buffered line as one object and clear the buffer.
    ///
    /// The buffer is emptied whether or not the upload succeeds; a failed
    /// batch is handled by the configured [`FlushFailurePolicy`] and
    /// reported once through the fallback channel.
    pub async fn flush(&mut self) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let lines = self.buffer.take();
        let records = lines.len();
        let key = log_object_key(&self.identity.category, self.identity.day_partition, (self.clock)());
        let payload = join_lines(lines);

        let mut result = self.upload(&key, payload.clone()).await;
        if result.is_err() && self.on_flush_failure == FlushFailurePolicy::RetryOnce {
            result = self.upload(&key, payload.clone()).await;
        }

        let error = match result {
            Ok(()) => return FlushOutcome::Uploaded { key, records },
            Err(e) => e.to_string(),
        };

        if let FlushFailurePolicy::SpillToDisk(dir) = &self.on_flush_failure {
            match spill(dir, &key, &payload).await {
                Ok(path) => {
                    self.fallback.report(&format!(
                        "failed to upload {} log records to {}/{}: {}; spilled to {}",
                        records,
                        self.identity.destination_bucket,
                        key,
                        error,
                        path.display()
                    ));
                    return FlushOutcome::Spilled { key, records, path };
                }
                Err(spill_err) => {
                    let error = format!("{}; spill failed: {}", error, spill_err);
                    self.report_discard(&key, records, &error);
                    return FlushOutcome::Discarded { key, records, error };
                }
            }
        }

        self.report_discard(&key, records, &error);
        FlushOutcome::Discarded { key, records, error }
    }

    async fn upload(&self, key: &str, payload: Bytes) -> Result<(), StorageError> {
        self.storage
            .put_object(&self.identity.destination_bucket, key, payload, LOG_CONTENT_TYPE)
            .await
    }

    fn report_discard(&self, key: &str, records: usize, error: &str) {
        self.fallback.report(&format!(
            "failed to upload {} log records to {}/{}: {}; batch discarded",
            records, self.identity.destination_bucket, key, error
        ));
    }
}

#[async_trait]
impl LogSink for BufferedLogSink {
    async fn send(&mut self, record: LogRecord) {
        BufferedLogSink::emit(self, &record).await;
    }

    async fn flush(&mut self) -> FlushOutcome {
        BufferedLogSink::flush(self).await
    }
}

fn join_lines(lines: Vec<String>) -> Bytes {
    let mut payload = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        payload.push_str(&line);
        payload.push('\n');
    }
    Bytes::from(payload)
}

async fn spill(dir: &Path, key: &str, payload: &Bytes) -> std::io::Result<PathBuf> {
    let path = dir.join(key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, payload).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::MemoryFallback;
    use crate::format::FormatError;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStorage {
        puts: Mutex<Vec<(String, String, Bytes, String)>>,
        failures_left: AtomicUsize,
        unreachable: bool,
    }

    impl RecordingStorage {
        fn failing(times: usize) -> Self {
            let storage = Self::default();
            storage.failures_left.store(times, Ordering::SeqCst);
            storage
        }

        fn puts(&self) -> Vec<(String, String, Bytes, String)> {
            self.puts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn check(&self, _bucket: &str) -> Result<(), StorageError> {
            if self.unreachable {
                return Err(StorageError::Configuration("connection refused".into()));
            }
            Ok(())
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            content_type: &str,
        ) -> Result<(), StorageError> {
            self.puts
                .lock()
                .unwrap()
                .push((bucket.into(), key.into(), body, content_type.into()));
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StorageError::Io(std::io::Error::other("bucket missing")));
            }
            Ok(())
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
            Err(StorageError::NotFound { bucket: bucket.into(), key: key.into() })
        }
    }

    struct BrokenFormatter;

    impl LogFormatter for BrokenFormatter {
        fn format(&self, _record: &LogRecord) -> Result<String, FormatError> {
            Err(FormatError::Empty)
        }
    }

    fn fixed_clock() -> Clock {
        Arc::new(|| Utc.with_ymd_and_hms(2025, 2, 18, 10, 45, 30).unwrap())
    }

    fn message_formatter() -> Arc<dyn LogFormatter> {
        struct MessageOnly;
        impl LogFormatter for MessageOnly {
            fn format(&self, record: &LogRecord) -> Result<String, FormatError> {
                Ok(format!("INFO - {}", record.message.clone().unwrap_or_default()))
            }
        }
        Arc::new(MessageOnly)
    }

    async fn sink(
        storage: Arc<RecordingStorage>,
        capacity: usize,
        fallback: Arc<MemoryFallback>,
    ) -> BufferedLogSink {
        BufferedLogSink::builder(storage, "gst", "players", capacity)
            .clock(fixed_clock())
            .formatter(message_formatter())
            .fallback(fallback)
            .connect()
            .await
            .unwrap()
    }

    fn rec(message: &str) -> LogRecord {
        LogRecord::new("INFO", "gst_ingest::steam", message)
    }

    #[tokio::test]
    async fn below_capacity_nothing_is_flushed() {
        let storage = Arc::new(RecordingStorage::default());
        let mut sink = sink(storage.clone(), 5, Arc::new(MemoryFallback::new())).await;

        for i in 0..4 {
            assert_eq!(sink.emit(&rec(&i.to_string())).await, None);
        }
        assert_eq!(sink.pending_count(), 4);
        assert!(storage.puts().is_empty());
    }

    #[tokio::test]
    async fn reaching_capacity_uploads_one_object_in_order() {
        let storage = Arc::new(RecordingStorage::default());
        let mut sink = sink(storage.clone(), 3, Arc::new(MemoryFallback::new())).await;

        sink.emit(&rec("a")).await;
        sink.emit(&rec("b")).await;
        let outcome = sink.emit(&rec("c")).await;

        let key = "logs/players/2025-02-18/fetch_players_2025-02-18_10-45-30.log".to_string();
        assert_eq!(outcome, Some(FlushOutcome::Uploaded { key: key.clone(), records: 3 }));
        assert_eq!(sink.pending_count(), 0);

        let puts = storage.puts();
        assert_eq!(puts.len(), 1);
        let (bucket, put_key, body, content_type) = &puts[0];
        assert_eq!(bucket, "gst");
        assert_eq!(put_key, &key);
        assert_eq!(content_type, "text/plain");

        let text = std::str::from_utf8(body).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("a"));
        assert!(lines[1].ends_with("b"));
        assert!(lines[2].ends_with("c"));
    }

    #[tokio::test]
    async fn flushing_an_empty_buffer_makes_no_storage_call() {
        let storage = Arc::new(RecordingStorage::default());
        let mut sink = sink(storage.clone(), 3, Arc::new(MemoryFallback::new())).await;

        assert_eq!(sink.flush().await, FlushOutcome::Empty);
        assert!(storage.puts().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_discards_batch_and_reports_once() {
        let storage = Arc::new(RecordingStorage::failing(1));
        let fallback = Arc::new(MemoryFallback::new());
        let mut sink = sink(storage.clone(), 10, fallback.clone()).await;

        sink.emit(&rec("a")).await;
        sink.emit(&rec("b")).await;
        let outcome = sink.flush().await;

        assert!(matches!(outcome, FlushOutcome::Discarded { records: 2, .. }));
        assert_eq!(sink.pending_count(), 0);
        assert_eq!(storage.puts().len(), 1);
        let entries = fallback.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("batch discarded"));

        // The discarded batch is not resent with the next one.
        sink.emit(&rec("c")).await;
        assert!(matches!(sink.flush().await, FlushOutcome::Uploaded { records: 1, .. }));
        assert_eq!(fallback.entries().len(), 1);
    }

    #[tokio::test]
    async fn retry_once_recovers_from_a_single_failure() {
        let storage = Arc::new(RecordingStorage::failing(1));
        let fallback = Arc::new(MemoryFallback::new());
        let mut sink = BufferedLogSink::builder(storage.clone(), "gst", "players", 10)
            .clock(fixed_clock())
            .on_flush_failure(FlushFailurePolicy::RetryOnce)
            .fallback(fallback.clone())
            .connect()
            .await
            .unwrap();

        sink.emit(&rec("a")).await;
        assert!(matches!(sink.flush().await, FlushOutcome::Uploaded { records: 1, .. }));
        assert_eq!(storage.puts().len(), 2);
        assert!(fallback.entries().is_empty());
    }

    #[tokio::test]
    async fn spill_policy_writes_batch_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RecordingStorage::failing(usize::MAX));
        let fallback = Arc::new(MemoryFallback::new());
        let mut sink = BufferedLogSink::builder(storage, "gst", "streams", 10)
            .clock(fixed_clock())
            .formatter(message_formatter())
            .on_flush_failure(FlushFailurePolicy::SpillToDisk(dir.path().to_path_buf()))
            .fallback(fallback.clone())
            .connect()
            .await
            .unwrap();

        sink.emit(&rec("kept")).await;
        let outcome = sink.flush().await;

        let expected = dir
            .path()
            .join("logs/streams/2025-02-18/fetch_streams_2025-02-18_10-45-30.log");
        match outcome {
            FlushOutcome::Spilled { path, records, .. } => {
                assert_eq!(records, 1);
                assert_eq!(path, expected);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&expected).unwrap(), "INFO - kept\n");
        assert_eq!(fallback.entries().len(), 1);
        assert_eq!(sink.pending_count(), 0);
    }

    #[tokio::test]
    async fn retry_once_gives_up_after_the_second_failure() {
        let storage = Arc::new(RecordingStorage::failing(2));
        let fallback = Arc::new(MemoryFallback::new());
        let mut sink = BufferedLogSink::builder(storage.clone(), "gst", "players", 10)
            .clock(fixed_clock())
            .on_flush_failure(FlushFailurePolicy::RetryOnce)
            .fallback(fallback.clone())
            .connect()
            .await
            .unwrap();

        sink.emit(&rec("a")).await;
        sink.emit(&rec("b")).await;

        assert!(matches!(sink.flush().await, FlushOutcome::Discarded { records: 2, .. }));
        assert_eq!(storage.puts().len(), 2);
        let entries = fallback.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("batch discarded"));
        assert_eq!(sink.pending_count(), 0);
    }

    #[tokio::test]
    async fn unwritable_spill_directory_discards_the_batch() {
        // A regular file where the spill directory should be.
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let storage = Arc::new(RecordingStorage::failing(usize::MAX));
        let fallback = Arc::new(MemoryFallback::new());
        let mut sink = BufferedLogSink::builder(storage.clone(), "gst", "streams", 10)
            .clock(fixed_clock())
            .on_flush_failure(FlushFailurePolicy::SpillToDisk(blocker.path().to_path_buf()))
            .fallback(fallback.clone())
            .connect()
            .await
            .unwrap();

        sink.emit(&rec("lost")).await;
        match sink.flush().await {
            FlushOutcome::Discarded { records, error, .. } => {
                assert_eq!(records, 1);
                assert!(error.contains("spill failed"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(storage.puts().len(), 1);
        let entries = fallback.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("spill failed"));
        assert!(entries[0].contains("batch discarded"));
        assert_eq!(sink.pending_count(), 0);
    }

    #[tokio::test]
    async fn unformattable_records_are_dropped() {
        let storage = Arc::new(RecordingStorage::default());
        let fallback = Arc::new(MemoryFallback::new());
        let mut sink = BufferedLogSink::builder(storage.clone(), "gst", "players", 1)
            .formatter(Arc::new(BrokenFormatter))
            .fallback(fallback.clone())
            .connect()
            .await
            .unwrap();

        assert_eq!(sink.emit(&rec("x")).await, None);
        assert_eq!(sink.pending_count(), 0);
        assert!(storage.puts().is_empty());
        assert_eq!(fallback.entries().len(), 1);
    }

    #[tokio::test]
    async fn day_partition_is_frozen_at_construction() {
        let storage = Arc::new(RecordingStorage::default());
        let day = NaiveDate::from_ymd_opt(2025, 2, 17).unwrap();
        let mut sink = BufferedLogSink::builder(storage, "gst", "players", 1)
            .clock(fixed_clock())
            .day_partition(day)
            .connect()
            .await
            .unwrap();

        assert_eq!(sink.identity().day_partition, day);
        match sink.emit(&rec("late")).await {
            Some(FlushOutcome::Uploaded { key, .. }) => assert_eq!(
                key,
                "logs/players/2025-02-17/fetch_players_2025-02-18_10-45-30.log"
            ),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn construction_fails_fast() {
        let unreachable = Arc::new(RecordingStorage { unreachable: true, ..Default::default() });
        let err = BufferedLogSink::builder(unreachable, "gst", "players", 10)
            .connect()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SinkError::Storage(_)));

        let storage = Arc::new(RecordingStorage::default());
        for (bucket, category, capacity) in [("", "players", 1), ("gst", " ", 1), ("gst", "players", 0)] {
            let err = BufferedLogSink::builder(storage.clone(), bucket, category, capacity)
                .connect()
                .await
                .err()
                .unwrap();
            assert!(matches!(err, SinkError::InvalidConfig(_)));
        }
    }
}
