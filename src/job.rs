use crate::config::ConfigError;
use crate::data::DataError;
use crate::init::InitError;

/// Error type shared by the ingestion jobs.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] InitError),

    #[error("no app ids available")]
    NoAppIds,

    #[error("no {0} data collected")]
    NothingCollected(&'static str),
}

/// Summary of one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Data objects written to storage.
    pub objects_written: usize,
    /// Items fetched (app ids answered, streams listed, ...).
    pub items: usize,
}
