use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;

use crate::error::{WatchError, WatchResult};

/// File every worker drops into its output directory at startup.
pub const CONFIG_FILE: &str = "fuzzer-config.json";

/// Static description of a worker, as written once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerDescriptor {
    pub pid: i32,
    /// Seconds since the unix epoch.
    pub start_time: i64,
    pub corpus: PathBuf,
    pub crashes: PathBuf,
    pub metrics: PathBuf,
    pub mode: String,
    pub seed: u64,
    pub labels: Vec<String>,
}

// On-disk shape. Unknown fields (ports, timeouts, core pinning, ...) are ignored.
#[derive(Debug, Deserialize)]
struct RawConfigFile {
    pid: i64,
    start_time: i64,
    config: RawWorkerConfig,
}

#[derive(Debug, Deserialize)]
struct RawWorkerConfig {
    corpus: PathBuf,
    crashes: PathBuf,
    metrics: PathBuf,
    mode: String,
    seed: u64,
    // configs written before labelling existed have no labels at all
    #[serde(default)]
    labels: Vec<String>,
}

/// Read and validate the worker config living in `dir`.
pub async fn load_descriptor(dir: &Path) -> WatchResult<WorkerDescriptor> {
    let path = dir.join(CONFIG_FILE);
    let blob = match fs::read(&path).await {
        Ok(blob) => blob,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(WatchError::ConfigNotFound(path));
        }
        Err(source) => return Err(WatchError::ConfigRead { path, source }),
    };
    parse_descriptor(&path, &blob)
}

fn parse_descriptor(path: &Path, blob: &[u8]) -> WatchResult<WorkerDescriptor> {
    let malformed = |reason: String| WatchError::ConfigMalformed {
        path: path.to_path_buf(),
        reason,
    };

    let raw: RawConfigFile =
        serde_json::from_slice(blob).map_err(|err| malformed(err.to_string()))?;

    let pid = i32::try_from(raw.pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| malformed(format!("invalid pid {}", raw.pid)))?;
    if raw.start_time < 0 {
        return Err(malformed(format!("negative start_time {}", raw.start_time)));
    }
    if raw.config.mode.is_empty() {
        return Err(malformed("empty mode".to_string()));
    }
    for (field, value) in [
        ("corpus", &raw.config.corpus),
        ("crashes", &raw.config.crashes),
        ("metrics", &raw.config.metrics),
    ] {
        if value.as_os_str().is_empty() {
            return Err(malformed(format!("empty {field} path")));
        }
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(WorkerDescriptor {
        pid,
        start_time: raw.start_time,
        corpus: base.join(&raw.config.corpus),
        crashes: base.join(&raw.config.crashes),
        metrics: base.join(&raw.config.metrics),
        mode: raw.config.mode,
        seed: raw.config.seed,
        labels: raw.config.labels,
    })
}
