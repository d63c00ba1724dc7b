use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the layer itself without any
/// storage I/O, and for tests that only care about routing.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&mut self, _record: LogRecord) {}
}
