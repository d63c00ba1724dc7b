use crate::env::{
    GST_BUCKET_NAME_ENV, MINIO_ACCESS_KEY_ENV, MINIO_ENDPOINT_ENV, MINIO_REGION_ENV,
    MINIO_SECRET_KEY_ENV, MINIO_SECURE_ENV, TWC_ACCESS_TOKEN_ENV, TWC_CLIENT_ID_ENV,
};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "ap-northeast-2";

/// Error returned when required configuration is missing or malformed.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Connection settings for an S3-compatible object store.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Full endpoint URL including scheme.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Bucket for data and logs.
    pub bucket_name: String,
    /// Permit plain `http://` endpoints.
    pub allow_http: bool,
}

impl StorageConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary lookup, e.g. a map in tests.
    ///
    /// Endpoints without a scheme get `http://` unless `MINIO_SECURE` is
    /// true, matching how MinIO clients treat bare `host:port` values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secure = match lookup(MINIO_SECURE_ENV) {
            None => false,
            Some(v) => parse_bool(MINIO_SECURE_ENV, &v)?,
        };

        let raw_endpoint = required(&lookup, MINIO_ENDPOINT_ENV)?;
        let endpoint = if raw_endpoint.starts_with("http://") || raw_endpoint.starts_with("https://") {
            raw_endpoint
        } else if secure {
            format!("https://{}", raw_endpoint)
        } else {
            format!("http://{}", raw_endpoint)
        };

        Ok(StorageConfig {
            allow_http: endpoint.starts_with("http://"),
            endpoint,
            access_key: required(&lookup, MINIO_ACCESS_KEY_ENV)?,
            secret_key: required(&lookup, MINIO_SECRET_KEY_ENV)?,
            region: lookup(MINIO_REGION_ENV)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket_name: required(&lookup, GST_BUCKET_NAME_ENV)?,
        })
    }
}

/// Credentials for the Twitch Helix API.
#[derive(Clone, Debug)]
pub struct TwitchConfig {
    pub client_id: String,
    pub access_token: String,
}

impl TwitchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(TwitchConfig {
            client_id: required(&lookup, TWC_CLIENT_ID_ENV)?,
            access_token: required(&lookup, TWC_ACCESS_TOKEN_ENV)?,
        })
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: value.to_string() }),
    }
}
