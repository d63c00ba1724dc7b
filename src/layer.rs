use crate::record::LogRecord;
use crate::sink::{FlushOutcome, LogSink};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicBool, AtomicU64, Ordering}};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets whose events never reach the sink: the sink's own storage and
/// HTTP stack would otherwise log into the batch it is uploading.
pub const DEFAULT_IGNORED_TARGETS: &[&str] = &[
    "object_store",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "tower",
    "rustls",
];

enum Command {
    Record(LogRecord),
    Flush(oneshot::Sender<FlushOutcome>),
    Shutdown(oneshot::Sender<FlushOutcome>),
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// forwards them to a [`LogSink`] owned by one background task.
///
/// The task is the sink's only owner, so appending, the threshold check
/// and the flush run strictly one after another and at most one flush
/// is ever in flight. Application threads only pay for a `try_send`.
pub struct LogShipLayer {
    sender: mpsc::Sender<Command>,
    min_level: Level,
    ignored_targets: Vec<String>,
    /// Total events seen by the layer (before filtering).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued for the sink.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full or the worker had stopped.
    pub dropped_events: Arc<AtomicU64>,
}

/// Control handle for the background task spawned by [`LogShipLayer::new`].
pub struct SinkHandle {
    sender: mpsc::Sender<Command>,
    join: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl LogShipLayer {
    /// Create a new layer and spawn the task that owns `sink`.
    ///
    /// `channel_buffer` is clamped to at least 16 so a burst at startup
    /// does not immediately overflow. Must be called inside a Tokio runtime.
    pub fn new(
        sink: Box<dyn LogSink>,
        channel_buffer: usize,
        min_level: Level,
        ignored_targets: Vec<String>,
    ) -> (Self, SinkHandle) {
        let channel_buffer = channel_buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<Command>(channel_buffer);
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_bg = Arc::clone(&stopped);

        let join = tokio::spawn(async move {
            let mut sink = sink;
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Record(record) => sink.send(record).await,
                    Command::Flush(reply) => {
                        let _ = reply.send(sink.flush().await);
                    }
                    Command::Shutdown(reply) => {
                        stopped_bg.store(true, Ordering::SeqCst);
                        rx.close();
                        // Records already queued still belong in the final batch.
                        while let Ok(Command::Record(record)) = rx.try_recv() {
                            sink.send(record).await;
                        }
                        let _ = reply.send(sink.flush().await);
                        return;
                    }
                }
            }
            // Every sender is gone: drain what is left.
            stopped_bg.store(true, Ordering::SeqCst);
            sink.flush().await;
        });

        let layer = LogShipLayer {
            sender: tx.clone(),
            min_level,
            ignored_targets,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        };
        let handle = SinkHandle { sender: tx, join: Some(join), stopped };
        (layer, handle)
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|prefix| {
            target == prefix
                || target
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }
}

impl SinkHandle {
    /// Flush whatever the sink has buffered, after every record enqueued
    /// before this call has been processed.
    pub async fn flush(&self) -> FlushOutcome {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(Command::Flush(reply)).await.is_err() {
            return FlushOutcome::Empty;
        }
        rx.await.unwrap_or(FlushOutcome::Empty)
    }

    /// Final flush, then stop the background task.
    ///
    /// Records emitted after this call are counted as dropped.
    pub async fn shutdown(mut self) -> FlushOutcome {
        let outcome = self.request_shutdown().await;
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                eprintln!("log sink task failed: {}", e);
            }
        }
        outcome
    }

    /// Whether the background task has stopped accepting records.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn request_shutdown(&self) -> FlushOutcome {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(Command::Shutdown(reply)).await.is_err() {
            return FlushOutcome::Empty;
        }
        rx.await.unwrap_or(FlushOutcome::Empty)
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        // Not shut down explicitly: ask the task to drain without waiting.
        if self.join.is_some() && !self.is_stopped() {
            let (reply, _rx) = oneshot::channel();
            if self.sender.try_send(Command::Shutdown(reply)).is_err() {
                eprintln!("log sink dropped without shutdown; buffered records may be lost");
            }
        }
    }
}

impl<S> Layer<S> for LogShipLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.min_level || self.is_ignored(meta.target()) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            fields,
            message,
        };

        match self.sender.try_send(Command::Record(record)) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

use tracing::field::{Field, Visit};

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `info!("text {}", x)` arrives here as a pre-formatted message.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}
