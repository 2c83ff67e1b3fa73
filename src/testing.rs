//! Fixtures shared by the store and API tests.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};

use crate::fleet::config::CONFIG_FILE;
use crate::fleet::liveness::{Liveness, LivenessProbe};

/// Probe with a canned answer.
pub struct FixedProbe(pub Liveness);

impl LivenessProbe for FixedProbe {
    fn probe(&self, _pid: i32) -> Liveness {
        self.0
    }
}

pub struct WorkerFixture {
    pub pid: i32,
    pub start_time: i64,
    pub mode: &'static str,
    pub labels: Vec<&'static str>,
    pub corpus_files: usize,
    pub crash_files: usize,
    /// `(timestamp, coverage, total_edges)`
    pub heartbeats: Vec<(i64, i64, i64)>,
}

impl Default for WorkerFixture {
    fn default() -> Self {
        Self {
            pid: 100,
            start_time: 1_700_000_000,
            mode: "bytes",
            labels: Vec::new(),
            corpus_files: 0,
            crash_files: 0,
            heartbeats: Vec::new(),
        }
    }
}

impl WorkerFixture {
    /// Lay the worker's output out under `root/name` and return that directory.
    pub fn write(&self, root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join("corpus")).unwrap();
        std::fs::create_dir_all(dir.join("crashes")).unwrap();
        fill(&dir.join("corpus"), self.corpus_files);
        fill(&dir.join("crashes"), self.crash_files);

        let conn = Connection::open(dir.join("metrics.db")).unwrap();
        conn.execute(
            "CREATE TABLE heartbeat (
                timestamp INTEGER PRIMARY KEY,
                coverage INTEGER NOT NULL,
                total_edges INTEGER NOT NULL,
                execs INTEGER NOT NULL,
                valid_execs INTEGER NOT NULL,
                valid_corpus INTEGER NOT NULL,
                corpus INTEGER NOT NULL
            )",
            [],
        )
        .unwrap();
        for (ts, coverage, total) in &self.heartbeats {
            conn.execute(
                "INSERT INTO heartbeat VALUES (?1, ?2, ?3, 0, 0, 0, 0)",
                params![ts, coverage, total],
            )
            .unwrap();
        }

        let config = serde_json::json!({
            "pid": self.pid,
            "start_time": self.start_time,
            "config": {
                "corpus": "corpus",
                "crashes": "crashes",
                "metrics": "metrics.db",
                "mode": self.mode,
                "seed": 1,
                "labels": self.labels,
                "port": 0,
            },
        });
        std::fs::write(dir.join(CONFIG_FILE), config.to_string()).unwrap();
        dir
    }
}

pub fn fill(dir: &Path, files: usize) {
    for i in 0..files {
        std::fs::write(dir.join(format!("entry_{i}")), b"x").unwrap();
    }
}

/// Swap a worker's metrics store for a FIFO nobody writes to, so opening it
/// hangs until [`release_fifo`] is called.
#[cfg(unix)]
pub fn hang_metrics_store(worker_dir: &Path) -> PathBuf {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let path = worker_dir.join("metrics.db");
    std::fs::remove_file(&path).unwrap();
    let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);
    path
}

/// Briefly open the FIFO for writing until `done` reports the blocked reader
/// has gone, so no blocking thread outlives the test runtime.
#[cfg(unix)]
pub async fn release_fifo(path: &Path, done: impl Fn() -> bool) {
    use std::os::unix::fs::OpenOptionsExt;

    for _ in 0..400 {
        if done() {
            return;
        }
        // fails with ENXIO until a reader is waiting on the other end
        let writer = std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path);
        drop(writer);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("reader of {path:?} never returned");
}
