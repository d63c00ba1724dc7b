/// Environment variable names read by [`crate::config`].
///
/// These are purely helpers; the sink and storage types never touch the
/// process environment themselves.

/// S3-compatible endpoint, e.g. `minio:9000` or `http://127.0.0.1:9000`.
pub const MINIO_ENDPOINT_ENV: &str = "MINIO_ENDPOINT";

/// Access key for the object store.
pub const MINIO_ACCESS_KEY_ENV: &str = "MINIO_ACCESS_KEY";

/// Secret key for the object store.
pub const MINIO_SECRET_KEY_ENV: &str = "MINIO_SECRET_KEY";

/// Optional region; defaults to [`crate::config::DEFAULT_REGION`].
pub const MINIO_REGION_ENV: &str = "MINIO_REGION";

/// Optional `true`/`false`; when true the endpoint is reached over HTTPS.
pub const MINIO_SECURE_ENV: &str = "MINIO_SECURE";

/// Bucket holding both the ingested data and the shipped logs.
pub const GST_BUCKET_NAME_ENV: &str = "GST_BUCKET_NAME";

/// Twitch application client id.
pub const TWC_CLIENT_ID_ENV: &str = "TWC_CLIENT_ID";

/// Twitch app access token.
pub const TWC_ACCESS_TOKEN_ENV: &str = "TWC_ACCESS_TOKEN";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
