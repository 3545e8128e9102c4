use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Every pool slot is checked out.
    #[error("connection pool exhausted ({max} connections in use)")]
    PoolExhausted { max: usize },

    #[error("timed out after {waited:?} waiting for one of {max} pooled connections")]
    PoolTimeout { max: usize, waited: Duration },

    #[error("connection pool is closed")]
    PoolClosed,

    /// A feed entry is missing a required field. Never fatal to a batch.
    #[error("invalid entry: missing {0}")]
    InvalidEntry(&'static str),

    #[error("feed title {0:?} does not produce a usable table name")]
    InvalidIdentifier(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("opml error: {0}")]
    Opml(#[from] opml::Error),

    #[error("summary API error: {0}")]
    SummaryApi(String),

    #[error("mirror sync failed: {0}")]
    Sync(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
