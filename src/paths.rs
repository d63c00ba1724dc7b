//! Storage key layout shared by the log sink and the ingestion jobs.
//!
//! Downstream consumers read historical objects by these exact keys, so
//! every format string here is part of the external interface.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

const DAY_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Top-level split between payload data and shipped logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Data,
    Logs,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Data => "data",
            StorageType::Logs => "logs",
        }
    }
}

/// Medallion layer a dataset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayer {
    Bronze,
    Silver,
    Gold,
}

impl DataLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataLayer::Bronze => "bronze",
            DataLayer::Silver => "silver",
            DataLayer::Gold => "gold",
        }
    }
}

/// Key of one flushed log batch:
/// `logs/{category}/{day}/fetch_{category}_{flush timestamp}.log`.
///
/// `day` is the partition frozen when the sink was built, `flushed_at` is
/// taken when the batch is flushed; both are UTC.
pub fn log_object_key(category: &str, day: NaiveDate, flushed_at: DateTime<Utc>) -> String {
    format!(
        "logs/{category}/{}/fetch_{category}_{}.log",
        day.format(DAY_FORMAT),
        flushed_at.format(TIMESTAMP_FORMAT),
    )
}

/// Hive-style hourly partition directory, always ending in `/`:
/// `{type}/{layer}/{origin}/{category}/year=YYYY/month=MM/day=DD/hour=HH/`.
pub fn partition_prefix(
    storage_type: StorageType,
    layer: DataLayer,
    origin: &str,
    category: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}/{}/{}/year={}/month={:02}/day={:02}/hour={:02}/",
        storage_type.as_str(),
        layer.as_str(),
        origin,
        category,
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
    )
}

/// `{stem}_{YYYY-MM-DD_HH-MM-SS}.json`
pub fn timestamped_json_name(stem: &str, now: DateTime<Utc>) -> String {
    format!("{stem}_{}.json", now.format(TIMESTAMP_FORMAT))
}

/// Key of one raw Twitch page:
/// `data/raw/twitch/{type}/{day}/{hour}/fetch_{type}_{page}_{timestamp}.json`.
pub fn twitch_page_key(data_type: &str, page: usize, now: DateTime<Utc>) -> String {
    format!(
        "data/raw/twitch/{data_type}/{}/{}/fetch_{data_type}_{page}_{}.json",
        now.format(DAY_FORMAT),
        now.format("%H"),
        now.format(TIMESTAMP_FORMAT),
    )
}
