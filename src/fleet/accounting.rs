use std::path::Path;

use tokio::fs;

use crate::error::{WatchError, WatchResult};

// These ratios mirror the worker's output layout and must change with it;
// a mismatch silently skews the dashboard counts.
/// Each corpus input `x` is written next to a hidden `.x` sidecar.
pub const CORPUS_FILES_PER_ENTRY: u64 = 2;
/// Each crash input `x` is written with `.x` and `.x_1.metadata`.
pub const CRASH_FILES_PER_ENTRY: u64 = 3;

pub async fn corpus_count(dir: &Path) -> WatchResult<u64> {
    count_entries(dir, CORPUS_FILES_PER_ENTRY).await
}

pub async fn crash_count(dir: &Path) -> WatchResult<u64> {
    count_entries(dir, CRASH_FILES_PER_ENTRY).await
}

/// Number of raw directory entries divided by `files_per_entry`. A directory
/// that does not exist yet counts as empty.
async fn count_entries(dir: &Path, files_per_entry: u64) -> WatchResult<u64> {
    let accounting = |source| WatchError::Accounting {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(accounting(err)),
    };

    let mut files = 0u64;
    while entries.next_entry().await.map_err(accounting)?.is_some() {
        files += 1;
    }
    Ok(files / files_per_entry)
}
