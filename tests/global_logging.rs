// Installs the process-wide subscriber, so it lives in its own test binary.

mod common;

use common::RecordingStorage;
use gst_ingest::init::{init_logging, InitError, SinkConfig};
use gst_ingest::sink::FlushOutcome;
use std::sync::Arc;
use tracing::info;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn global_pipeline_captures_events_from_worker_threads() {
    let storage = Arc::new(RecordingStorage::default());
    let mut config = SinkConfig::new("gst", "streams", 100);
    config.enable_stdout = false;

    let guard = init_logging(storage.clone(), config.clone()).await.unwrap();

    tokio::spawn(async { info!("from a spawned task") }).await.unwrap();
    std::thread::spawn(|| info!("from a plain thread")).join().unwrap();
    info!("from the caller");

    let second = init_logging(storage.clone(), config).await;
    assert!(matches!(second, Err(InitError::GlobalAlreadySet(_))));

    assert!(matches!(guard.shutdown().await, FlushOutcome::Uploaded { records: 3, .. }));
    let puts = storage.puts();
    assert_eq!(puts.len(), 1);
    assert!(puts[0].key.starts_with("logs/streams/"));
    for message in ["from a spawned task", "from a plain thread", "from the caller"] {
        assert!(puts[0].body.contains(message), "missing {:?}", message);
    }
}
