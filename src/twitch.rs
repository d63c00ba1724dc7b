//! Twitch ingestion: live stream listings from the Helix API.

use crate::config::TwitchConfig;
use crate::data::DataStore;
use crate::job::{JobError, JobReport};
use crate::paths::twitch_page_key;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info};

pub const TWITCH_HELIX_URL: &str = "https://api.twitch.tv/helix";

/// Category label for stream listings.
pub const STREAMS_DATA_TYPE: &str = "streams";

/// Streams requested per page (Helix maximum).
pub const PAGE_SIZE: u32 = 100;

/// Page cap used when the caller does not pick one.
pub const DEFAULT_MAX_PAGES: usize = 100;

#[derive(Clone, Debug)]
pub struct TwitchClient {
    http: reqwest::Client,
    base_url: String,
    config: TwitchConfig,
}

impl TwitchClient {
    pub fn new(http: reqwest::Client, config: TwitchConfig) -> Self {
        Self::with_base_url(http, TWITCH_HELIX_URL, config)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>, config: TwitchConfig) -> Self {
        TwitchClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        }
    }

    /// Page through `/streams`, saving every page as its own object.
    ///
    /// Stops after `max_pages` pages, when the response carries no cursor,
    /// or on the first non-success status (logged, not an error).
    pub async fn fetch_streams(
        &self,
        store: &DataStore,
        max_pages: usize,
        now: DateTime<Utc>,
    ) -> Result<JobReport, JobError> {
        let url = format!("{}/streams", self.base_url);
        let mut cursor: Option<String> = None;
        let mut report = JobReport::default();

        while report.objects_written < max_pages {
            info!(after = cursor.as_deref(), "sending request to twitch api");
            let mut request = self
                .http
                .get(&url)
                .header("Client-ID", &self.config.client_id)
                .bearer_auth(&self.config.access_token)
                .query(&[("first", PAGE_SIZE)]);
            if let Some(after) = &cursor {
                request = request.query(&[("after", after)]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!(status = status.as_u16(), body = %body, "twitch request failed");
                break;
            }

            let page: Value = response.json().await?;
            report.items += page.get("data").and_then(Value::as_array).map_or(0, Vec::len);
            report.objects_written += 1;

            let key = twitch_page_key(STREAMS_DATA_TYPE, report.objects_written, now);
            store.save_json(&key, &page).await?;
            info!(page = report.objects_written, key = %key, "streams page saved");

            match next_cursor(&page) {
                Some(next) => {
                    info!(cursor = %next, "next cursor");
                    cursor = Some(next);
                }
                None => {
                    info!("no more pages to fetch");
                    break;
                }
            }
        }

        info!(streams = report.items, pages = report.objects_written, "fetched streams");
        Ok(report)
    }
}

fn next_cursor(page: &Value) -> Option<String> {
    page.get("pagination")?
        .get("cursor")?
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}
