pub mod record;
pub mod format;
pub mod sink;
pub mod layer;
pub mod fallback;

pub mod storage;
pub mod store;
pub mod paths;

pub mod init;
pub mod noop_sink;
pub mod env;
pub mod config;

pub mod data;
pub mod job;
pub mod steam;
pub mod twitch;
