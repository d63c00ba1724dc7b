use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, Level};

#[cfg(feature = "s3")]
use gst_ingest::config::StorageConfig;
use gst_ingest::config::{ConfigError, TwitchConfig};
use gst_ingest::data::DataStore;
use gst_ingest::env::{env_or, GST_BUCKET_NAME_ENV};
use gst_ingest::format::{JsonFormatter, LogFormatter, TextFormatter};
use gst_ingest::init::{init_logging, SinkConfig};
use gst_ingest::job::{JobError, JobReport};
use gst_ingest::sink::FlushFailurePolicy;
use gst_ingest::steam::{run_discounts_job, run_players_job, SteamClient};
use gst_ingest::storage::ObjectStorage;
use gst_ingest::store::ObjectStoreStorage;
use gst_ingest::twitch::{TwitchClient, DEFAULT_MAX_PAGES, STREAMS_DATA_TYPE};

/// Fetch game and stream metadata and land it in object storage.
#[derive(Parser, Debug)]
#[command(name = "gst-ingest", version)]
struct Cli {
    #[command(subcommand)]
    job: Job,

    /// Where data and logs are written.
    #[arg(long, value_enum, default_value_t = StorageMode::Minio)]
    storage: StorageMode,

    /// Root directory for `--storage local`.
    #[arg(long, default_value = "./dev")]
    local_root: PathBuf,

    /// Log records per uploaded log object.
    #[arg(long)]
    buffer_size: usize,

    /// Most verbose level shipped to storage.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Layout of the shipped log lines.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// What to do with a log batch whose upload failed.
    #[arg(long, value_enum, default_value_t = FailurePolicy::Discard)]
    on_flush_failure: FailurePolicy,

    /// Directory for `--on-flush-failure spill`.
    #[arg(long, default_value = "./log-spill")]
    spill_dir: PathBuf,

    /// Do not echo events to stdout.
    #[arg(long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Job {
    /// Current player counts for every known Steam app.
    Players,
    /// Store price overviews, 1000 apps per request.
    Discounts,
    /// Live Twitch streams.
    Streams {
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: usize,
    },
}

impl Job {
    fn data_type(&self) -> &'static str {
        match self {
            Job::Players => "players",
            Job::Discounts => "discounts",
            Job::Streams { .. } => STREAMS_DATA_TYPE,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StorageMode {
    Minio,
    Local,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FailurePolicy {
    Discard,
    RetryOnce,
    Spill,
}

fn open_storage(cli: &Cli) -> Result<(Arc<dyn ObjectStorage>, String), ConfigError> {
    match cli.storage {
        #[cfg(feature = "s3")]
        StorageMode::Minio => {
            let config = StorageConfig::from_env()?;
            let bucket = config.bucket_name.clone();
            Ok((Arc::new(ObjectStoreStorage::s3_compatible(config)), bucket))
        }
        #[cfg(not(feature = "s3"))]
        StorageMode::Minio => {
            Err(ConfigError::Invalid { key: "--storage", value: "minio (s3 feature disabled)".to_string() })
        }
        StorageMode::Local => {
            let bucket = env_or(GST_BUCKET_NAME_ENV, "gst");
            Ok((Arc::new(ObjectStoreStorage::local(&cli.local_root)), bucket))
        }
    }
}

enum Runner {
    Players(SteamClient),
    Discounts(SteamClient),
    Streams { client: TwitchClient, max_pages: usize },
}

impl Runner {
    async fn run(self, store: &DataStore) -> Result<JobReport, JobError> {
        let now = Utc::now();
        match self {
            Runner::Players(client) => run_players_job(&client, store, now).await,
            Runner::Discounts(client) => run_discounts_job(&client, store, now).await,
            Runner::Streams { client, max_pages } => client.fetch_streams(store, max_pages, now).await,
        }
    }
}

async fn run(cli: Cli) -> Result<JobReport, JobError> {
    let (storage, bucket) = open_storage(&cli)?;
    let data_type = cli.job.data_type();

    let http = reqwest::Client::new();
    let runner = match cli.job {
        Job::Players => Runner::Players(SteamClient::new(http)),
        Job::Discounts => Runner::Discounts(SteamClient::new(http)),
        Job::Streams { max_pages } => Runner::Streams {
            client: TwitchClient::new(http, TwitchConfig::from_env()?),
            max_pages,
        },
    };

    let mut sink_config = SinkConfig::new(bucket.clone(), data_type, cli.buffer_size);
    sink_config.log_level = cli.log_level;
    sink_config.enable_stdout = !cli.quiet;
    sink_config.formatter = match cli.log_format {
        LogFormat::Text => Arc::new(TextFormatter) as Arc<dyn LogFormatter>,
        LogFormat::Json => Arc::new(JsonFormatter),
    };
    sink_config.on_flush_failure = match cli.on_flush_failure {
        FailurePolicy::Discard => FlushFailurePolicy::Discard,
        FailurePolicy::RetryOnce => FlushFailurePolicy::RetryOnce,
        FailurePolicy::Spill => FlushFailurePolicy::SpillToDisk(cli.spill_dir.clone()),
    };

    let store = DataStore::new(Arc::clone(&storage), bucket);

    // Global, so events from tasks on every worker thread are shipped.
    let guard = init_logging(storage, sink_config).await?;

    info!(job = data_type, bucket = store.bucket(), "starting job");
    let result = runner.run(&store).await;
    if let Err(e) = &result {
        error!(error = %e, "job failed");
    }

    let dropped = guard.dropped_events();
    guard.shutdown().await;
    if dropped > 0 {
        eprintln!("gst-ingest: {} log records dropped (sink queue full)", dropped);
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            println!("wrote {} objects ({} items)", report.objects_written, report.items);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("gst-ingest: {}", e);
            ExitCode::FAILURE
        }
    }
}
