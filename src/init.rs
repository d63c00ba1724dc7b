use crate::fallback::{FallbackReporter, StderrFallback};
use crate::format::{LogFormatter, TextFormatter};
use crate::layer::{LogShipLayer, SinkHandle, DEFAULT_IGNORED_TARGETS};
use crate::sink::{BufferedLogSink, FlushFailurePolicy, FlushOutcome, LogSink, SinkError};
use crate::storage::ObjectStorage;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the log shipping pipeline.
///
/// **Fields**
/// - `bucket_name`: bucket receiving the log objects.
/// - `data_type`: category label used in the object keys (`players`, ...).
/// - `buffer_size`: records per flushed object. Required; jobs tune it.
/// - `log_level`: most verbose level routed to the sink.
/// - `channel_buffer`: records queued for the sink before new ones are
///   dropped and counted.
/// - `formatter`: renders each record into its log line; plain text by default.
/// - `on_flush_failure`: what happens to a batch whose upload failed.
/// - `enable_stdout`: also print events through a `fmt` layer.
/// - `ignored_targets`: target prefixes never routed to the sink.
#[derive(Clone)]
pub struct SinkConfig {
    pub bucket_name: String,
    pub data_type: String,
    pub buffer_size: usize,
    pub log_level: Level,
    pub channel_buffer: usize,
    pub formatter: Arc<dyn LogFormatter>,
    pub on_flush_failure: FlushFailurePolicy,
    pub enable_stdout: bool,
    pub ignored_targets: Vec<String>,
}

impl SinkConfig {
    pub fn new(bucket_name: impl Into<String>, data_type: impl Into<String>, buffer_size: usize) -> Self {
        SinkConfig {
            bucket_name: bucket_name.into(),
            data_type: data_type.into(),
            buffer_size,
            log_level: Level::INFO,
            channel_buffer: 1024,
            formatter: Arc::new(TextFormatter),
            on_flush_failure: FlushFailurePolicy::Discard,
            enable_stdout: true,
            ignored_targets: DEFAULT_IGNORED_TARGETS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("bucket_name", &self.bucket_name)
            .field("data_type", &self.data_type)
            .field("buffer_size", &self.buffer_size)
            .field("log_level", &self.log_level)
            .field("channel_buffer", &self.channel_buffer)
            .field("on_flush_failure", &self.on_flush_failure)
            .field("enable_stdout", &self.enable_stdout)
            .field("ignored_targets", &self.ignored_targets)
            .finish_non_exhaustive()
    }
}

/// Error returned when logging cannot be set up.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("a global tracing subscriber is already installed")]
    GlobalAlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Keeps the sink's background task alive and drains it on release.
pub struct LoggingGuard {
    handle: SinkHandle,
    dropped_events: Arc<AtomicU64>,
}

impl LoggingGuard {
    /// Flush buffered records now without stopping the sink.
    pub async fn flush(&self) -> FlushOutcome {
        self.handle.flush().await
    }

    /// Final flush and stop. Dropping the guard instead only requests a
    /// drain and cannot wait for the upload.
    pub async fn shutdown(self) -> FlushOutcome {
        self.handle.shutdown().await
    }

    /// Records lost because the sink's queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// An explicitly constructed logging pipeline for one job.
///
/// Nothing global is touched until [`LoggingContext::install_global`] is
/// called; [`LoggingContext::run`] scopes the subscriber to one job.
pub struct LoggingContext {
    layer: LogShipLayer,
    guard: LoggingGuard,
    enable_stdout: bool,
}

impl LoggingContext {
    /// Connect a [`BufferedLogSink`] to `storage` and wire it into a layer.
    ///
    /// Fails if the configuration is invalid or the bucket is unreachable.
    /// Must be called inside a Tokio runtime.
    pub async fn build(storage: Arc<dyn ObjectStorage>, config: SinkConfig) -> Result<Self, SinkError> {
        Self::build_with_fallback(storage, config, Arc::new(StderrFallback)).await
    }

    pub async fn build_with_fallback(
        storage: Arc<dyn ObjectStorage>,
        config: SinkConfig,
        fallback: Arc<dyn FallbackReporter>,
    ) -> Result<Self, SinkError> {
        let sink = BufferedLogSink::builder(
            storage,
            config.bucket_name.clone(),
            config.data_type.clone(),
            config.buffer_size,
        )
        .formatter(Arc::clone(&config.formatter))
        .on_flush_failure(config.on_flush_failure.clone())
        .fallback(fallback)
        .connect()
        .await?;

        Ok(Self::from_sink(Box::new(sink), &config))
    }

    /// Wire an already constructed sink; only the layer settings of
    /// `config` are used.
    pub fn from_sink(sink: Box<dyn LogSink>, config: &SinkConfig) -> Self {
        let (layer, handle) = LogShipLayer::new(
            sink,
            config.channel_buffer,
            config.log_level,
            config.ignored_targets.clone(),
        );
        let dropped_events = Arc::clone(&layer.dropped_events);

        LoggingContext {
            layer,
            guard: LoggingGuard { handle, dropped_events },
            enable_stdout: config.enable_stdout,
        }
    }

    /// Split into a subscriber and the guard that drains its sink.
    pub fn into_subscriber(self) -> (impl Subscriber + Send + Sync + 'static, LoggingGuard) {
        let fmt_layer = self.enable_stdout.then(|| tracing_subscriber::fmt::layer());
        let subscriber = Registry::default().with(self.layer).with(fmt_layer);
        (subscriber, self.guard)
    }

    /// Install as the process-wide default subscriber.
    pub fn install_global(self) -> Result<LoggingGuard, InitError> {
        let (subscriber, guard) = self.into_subscriber();
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(guard)
    }

    /// Run `job` with this pipeline as the current thread's subscriber and
    /// shut the sink down afterwards, whether the job succeeded or not.
    ///
    /// Events from tasks spawned onto other threads are not captured;
    /// use [`LoggingContext::install_global`] for those.
    pub async fn run<F, Fut, T>(self, job: F) -> (T, FlushOutcome)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (subscriber, guard) = self.into_subscriber();
        let output = {
            let _default = tracing::subscriber::set_default(subscriber);
            job().await
        };
        let outcome = guard.shutdown().await;
        (output, outcome)
    }
}

/// Build the pipeline and install it as the process-wide subscriber, so
/// events from every runtime thread reach the sink.
///
/// The caller owns the returned guard and must call
/// [`LoggingGuard::shutdown`] on every exit path to ship the last batch.
pub async fn init_logging(storage: Arc<dyn ObjectStorage>, config: SinkConfig) -> Result<LoggingGuard, InitError> {
    let context = LoggingContext::build(storage, config).await?;
    context.install_global()
}

/// Run a fallible job inside a freshly built logging context.
///
/// The sink is always drained before returning, including when the job
/// fails; a sink that cannot be built fails before the job starts.
pub async fn with_logging<F, Fut, T, E>(
    storage: Arc<dyn ObjectStorage>,
    config: SinkConfig,
    job: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<InitError>,
{
    let context = LoggingContext::build(storage, config)
        .await
        .map_err(|e| E::from(InitError::from(e)))?;
    let (result, _outcome) = context.run(job).await;
    result
}
