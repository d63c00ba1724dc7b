use std::sync::Mutex;

/// Out-of-band channel for problems the log sink hits while shipping logs.
///
/// Diagnostics must never be routed back through `tracing`, otherwise a
/// failing upload would feed new records into the sink that failed.
pub trait FallbackReporter: Send + Sync {
    fn report(&self, diagnostic: &str);
}

/// Writes diagnostics to stderr.
#[derive(Clone, Debug, Default)]
pub struct StderrFallback;

impl FallbackReporter for StderrFallback {
    fn report(&self, diagnostic: &str) {
        eprintln!("log sink: {}", diagnostic);
    }
}

/// Keeps diagnostics in memory so callers can inspect or forward them.
#[derive(Debug, Default)]
pub struct MemoryFallback {
    entries: Mutex<Vec<String>>,
}

impl MemoryFallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every diagnostic reported so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl FallbackReporter for MemoryFallback {
    fn report(&self, diagnostic: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(diagnostic.to_string());
        }
    }
}
