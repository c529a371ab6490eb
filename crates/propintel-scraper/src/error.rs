use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single page request. Local to the page; the coordinator
/// decides what it means for the partition.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A fetched page that cannot be read as a listing page.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{url} returned a bot-challenge page")]
    Blocked { url: String },

    #[error("{url} did not return an HTML document")]
    NotHtml { url: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to append to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that ends a partition early.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker task aborted: {0}")]
    Aborted(String),
}
