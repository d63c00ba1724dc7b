//! Steam ingestion: current player counts and store discounts.

use crate::data::{DataStore, APP_IDS_KEY};
use crate::job::{JobError, JobReport};
use crate::paths::{partition_prefix, timestamped_json_name, DataLayer, StorageType};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{error, info};

pub const STEAM_API_URL: &str = "https://api.steampowered.com";
pub const STEAM_STORE_URL: &str = "https://store.steampowered.com";

/// App ids per `appdetails` request.
pub const DISCOUNT_CHUNK_SIZE: usize = 1000;

const ORIGIN: &str = "steam";

/// Thin client over the two Steam endpoints the jobs use.
#[derive(Clone, Debug)]
pub struct SteamClient {
    http: reqwest::Client,
    api_url: String,
    store_url: String,
}

impl SteamClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_urls(http, STEAM_API_URL, STEAM_STORE_URL)
    }

    /// Point the client at other hosts, e.g. a mock server.
    pub fn with_base_urls(http: reqwest::Client, api_url: impl Into<String>, store_url: impl Into<String>) -> Self {
        SteamClient {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            store_url: store_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Raw `GetNumberOfCurrentPlayers` response for one app.
    pub async fn fetch_player_count(&self, appid: u64) -> Result<Value, reqwest::Error> {
        let url = format!("{}/ISteamUserStats/GetNumberOfCurrentPlayers/v1/", self.api_url);
        self.http
            .get(url)
            .query(&[("appid", appid)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Fetch all apps concurrently. Failed apps are logged and left out.
    pub async fn fetch_all_players(&self, appids: &[u64]) -> BTreeMap<u64, Value> {
        let requests = appids.iter().map(|&appid| async move {
            match self.fetch_player_count(appid).await {
                Ok(data) => {
                    info!(appid, "players fetched");
                    Some((appid, data))
                }
                Err(e) => {
                    error!(appid, error = %e, "failed to fetch players");
                    None
                }
            }
        });

        join_all(requests).await.into_iter().flatten().collect()
    }

    /// Raw `appdetails` price overview for a chunk of apps.
    pub async fn fetch_discounts(&self, appids: &[u64]) -> Result<Value, reqwest::Error> {
        let ids = appids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        let url = format!("{}/api/appdetails", self.store_url);
        self.http
            .get(url)
            .query(&[("appids", ids.as_str()), ("filters", "price_overview")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

async fn load_app_ids(store: &DataStore) -> Result<Vec<u64>, JobError> {
    let appids = store.load_app_ids(APP_IDS_KEY).await.map_err(|e| {
        error!(key = APP_IDS_KEY, error = %e, "failed to load app ids");
        e
    })?;
    if appids.is_empty() {
        error!("no app ids available to fetch");
        return Err(JobError::NoAppIds);
    }
    Ok(appids)
}

/// Fetch player counts for every known app and save them as one object
/// under the hourly `players` partition.
pub async fn run_players_job(
    client: &SteamClient,
    store: &DataStore,
    now: DateTime<Utc>,
) -> Result<JobReport, JobError> {
    let appids = load_app_ids(store).await?;
    let players = client.fetch_all_players(&appids).await;

    if players.is_empty() {
        error!("no players data collected to upload");
        return Err(JobError::NothingCollected("players"));
    }

    let key = format!(
        "{}{}",
        partition_prefix(StorageType::Data, DataLayer::Bronze, ORIGIN, "players", now),
        timestamped_json_name("players", now),
    );
    store.save_json(&key, &players).await?;
    info!(apps = players.len(), key = %key, "combined players data saved");

    Ok(JobReport { objects_written: 1, items: players.len() })
}

/// Fetch discounts in chunks of [`DISCOUNT_CHUNK_SIZE`] apps, saving one
/// object per successful chunk. Failed chunks are logged and skipped.
pub async fn run_discounts_job(
    client: &SteamClient,
    store: &DataStore,
    now: DateTime<Utc>,
) -> Result<JobReport, JobError> {
    let appids = load_app_ids(store).await?;
    let prefix = partition_prefix(StorageType::Data, DataLayer::Bronze, ORIGIN, "discounts", now);
    let mut report = JobReport::default();

    for (idx, chunk) in appids.chunks(DISCOUNT_CHUNK_SIZE).enumerate() {
        let idx = idx + 1;
        match client.fetch_discounts(chunk).await {
            Ok(data) if !is_empty_response(&data) => {
                let key = format!("{}{}", prefix, timestamped_json_name(&format!("combined_discounts_{}", idx), now));
                store.save_json(&key, &data).await?;
                info!(chunk = idx, key = %key, "discount data saved");
                report.objects_written += 1;
                report.items += chunk.len();
            }
            Ok(_) => error!(chunk = idx, "empty discount response"),
            Err(e) => error!(chunk = idx, error = %e, "failed to fetch discount data"),
        }
    }

    if report.objects_written == 0 {
        return Err(JobError::NothingCollected("discounts"));
    }
    Ok(report)
}

/// `null`, `{}`, `[]` and `""` carry no data worth saving.
fn is_empty_response(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
