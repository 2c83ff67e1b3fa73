use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no worker config at {0:?}")]
    ConfigNotFound(PathBuf),
    #[error("failed to read worker config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed worker config {path:?}: {reason}")]
    ConfigMalformed { path: PathBuf, reason: String },
    #[error("failed to list {path:?}: {source}")]
    Accounting {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("metrics store {path:?}: {source}")]
    MetricsStore {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("malformed heartbeat row {row} in {path:?}: {reason}")]
    RowMalformed {
        path: PathBuf,
        row: usize,
        reason: String,
    },
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type WatchResult<T> = Result<T, WatchError>;
