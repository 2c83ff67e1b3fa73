use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{WatchError, WatchResult};
use crate::fleet::accounting;
use crate::fleet::config::{CONFIG_FILE, WorkerDescriptor, load_descriptor};
use crate::fleet::liveness::{Liveness, LivenessProbe};
use crate::metrics::reader::{CoverageSnapshot, read_coverage};

/// The part of a worker that is re-derived on every refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatus {
    pub liveness: Liveness,
    pub corpus: u64,
    pub crashes: u64,
    pub coverage: CoverageSnapshot,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            liveness: Liveness::Stopped,
            corpus: 0,
            crashes: 0,
            coverage: CoverageSnapshot::default(),
        }
    }
}

/// One discovered worker. Identified by the directory holding its config;
/// the pid is informational since it can be reused after the worker exits.
#[derive(Debug)]
pub struct WorkerRecord {
    pub dir: PathBuf,
    pub descriptor: WorkerDescriptor,
    status: RwLock<WorkerStatus>,
    refreshing: AtomicBool,
}

impl WorkerRecord {
    fn new(dir: PathBuf, descriptor: WorkerDescriptor) -> Self {
        Self {
            dir,
            descriptor,
            status: RwLock::new(WorkerStatus::default()),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Claim this worker for one refresh. `None` while another refresh of it
    /// is still running.
    fn begin_refresh(self: &Arc<Self>) -> Option<RefreshGuard> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard(self.clone()))
    }

    #[cfg(test)]
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Snapshot of the last completed refresh.
    pub fn status(&self) -> WorkerStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_status(&self, next: WorkerStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Releases the worker's in-flight claim when the refresh ends, panics included.
struct RefreshGuard(Arc<WorkerRecord>);

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.refreshing.store(false, Ordering::Release);
    }
}

/// Outcome of one refresh pass, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub workers: usize,
    pub running: usize,
    pub failed_fields: usize,
    /// Workers skipped because their previous refresh had not finished.
    pub in_flight: usize,
}

/// All workers found under one root directory.
pub struct FleetStore {
    root: PathBuf,
    probe: Arc<dyn LivenessProbe>,
    workers: Vec<Arc<WorkerRecord>>,
}

impl FleetStore {
    /// Scan `root` for worker configs and take a first reading of each
    /// worker. Workers whose config cannot be loaded are logged and skipped.
    pub async fn discover(root: PathBuf, probe: Arc<dyn LivenessProbe>) -> WatchResult<Self> {
        let scan_root = root.clone();
        let dirs = tokio::task::spawn_blocking(move || scan_worker_dirs(&scan_root)).await?;
        info!(event = "fleet_scan", root = %root.display(), configs = dirs.len());

        let mut handles: Vec<(PathBuf, JoinHandle<WatchResult<WorkerRecord>>)> = Vec::new();
        for dir in dirs {
            let probe = probe.clone();
            let task_dir = dir.clone();
            handles.push((
                dir,
                tokio::spawn(async move {
                    let descriptor = load_descriptor(&task_dir).await?;
                    let record = WorkerRecord::new(task_dir, descriptor);
                    refresh_worker(&record, probe.as_ref()).await;
                    Ok::<_, WatchError>(record)
                }),
            ));
        }

        let mut workers = Vec::with_capacity(handles.len());
        for (dir, handle) in handles {
            match handle.await.map_err(WatchError::from).and_then(|res| res) {
                Ok(record) => {
                    info!(
                        event = "worker_discovered",
                        dir = %record.dir.display(),
                        pid = record.descriptor.pid,
                        mode = %record.descriptor.mode,
                        seed = record.descriptor.seed,
                    );
                    workers.push(Arc::new(record));
                }
                Err(err) => {
                    warn!(event = "worker_skipped", dir = %dir.display(), error = %err);
                }
            }
        }

        Ok(Self {
            root,
            probe,
            workers,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workers in discovery order.
    pub fn workers(&self) -> &[Arc<WorkerRecord>] {
        &self.workers
    }

    /// Start one refresh task per worker, skipping workers whose previous
    /// refresh is still running, and return without waiting for any of them.
    /// A slow worker only delays its own update.
    pub fn spawn_refresh(&self) -> usize {
        let launched = self.launch_refreshes();
        let count = launched.len();
        for (record, handle) in launched {
            tokio::spawn(async move {
                if let Err(err) = handle.await {
                    warn!(event = "refresh_task_failed", dir = %record.dir.display(), error = %err);
                }
            });
        }
        count
    }

    /// Refresh every worker that is not already mid-refresh and wait for
    /// those refreshes to finish. A field that fails to load keeps its
    /// previous value.
    pub async fn refresh(&self) -> RefreshSummary {
        let launched = self.launch_refreshes();
        let mut summary = RefreshSummary {
            workers: self.workers.len(),
            in_flight: self.workers.len() - launched.len(),
            ..Default::default()
        };
        for (record, handle) in launched {
            match handle.await {
                Ok(failed) => summary.failed_fields += failed,
                Err(err) => {
                    warn!(event = "refresh_task_failed", dir = %record.dir.display(), error = %err);
                    summary.failed_fields += 1;
                }
            }
        }
        summary.running = self
            .workers
            .iter()
            .filter(|record| record.status().liveness == Liveness::Running)
            .count();
        summary
    }

    fn launch_refreshes(&self) -> Vec<(Arc<WorkerRecord>, JoinHandle<usize>)> {
        self.workers
            .iter()
            .filter_map(|record| {
                let guard = record.begin_refresh()?;
                let probe = self.probe.clone();
                let handle = tokio::spawn(async move {
                    let failed = refresh_worker(&guard.0, probe.as_ref()).await;
                    drop(guard);
                    failed
                });
                Some((record.clone(), handle))
            })
            .collect()
    }
}

/// Kick off a fleet refresh every `period` until `shutdown` flips to true.
/// Ticks never wait on the refreshes they start, so shutdown is seen
/// promptly even while a worker's read hangs. The first tick is skipped
/// since discovery has just taken a reading.
pub async fn run_refresh_loop(
    store: Arc<FleetStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let workers = store.workers().len();
                let launched = store.spawn_refresh();
                debug!(
                    event = "refresh_tick",
                    workers,
                    launched,
                    in_flight = workers - launched,
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(event = "refresh_stopped");
                    return;
                }
            }
        }
    }
}

/// Directories under `root` holding a worker config, sorted for a stable
/// discovery order.
fn scan_worker_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(event = "fleet_scan_error", error = %err);
                continue;
            }
        };
        if entry.file_type().is_file() && entry.file_name() == CONFIG_FILE {
            if let Some(parent) = entry.path().parent() {
                dirs.push(parent.to_path_buf());
            }
        }
    }
    dirs
}

/// Take a fresh reading of one worker and publish it. The four lookups run
/// concurrently; the new status is assembled in full before it replaces the
/// old one. Returns the number of fields that kept a stale value.
async fn refresh_worker(record: &WorkerRecord, probe: &dyn LivenessProbe) -> usize {
    let descriptor = &record.descriptor;
    let metrics = descriptor.metrics.clone();
    let start_time = descriptor.start_time;

    let (liveness, corpus, crashes, coverage) = tokio::join!(
        async { probe.probe(descriptor.pid) },
        accounting::corpus_count(&descriptor.corpus),
        accounting::crash_count(&descriptor.crashes),
        async {
            tokio::task::spawn_blocking(move || read_coverage(&metrics, start_time))
                .await
                .map_err(WatchError::from)
                .and_then(|res| res)
        },
    );

    let mut next = record.status();
    let mut failed = 0;
    next.liveness = liveness;
    match corpus {
        Ok(count) => next.corpus = count,
        Err(err) => {
            failed += 1;
            field_failed(record, "corpus", &err);
        }
    }
    match crashes {
        Ok(count) => next.crashes = count,
        Err(err) => {
            failed += 1;
            field_failed(record, "crashes", &err);
        }
    }
    match coverage {
        Ok(snapshot) => next.coverage = snapshot,
        Err(err) => {
            failed += 1;
            field_failed(record, "coverage", &err);
        }
    }

    if let Some(latest) = &next.coverage.latest {
        debug!(
            event = "worker_refreshed",
            dir = %record.dir.display(),
            execs = latest.execs,
            valid_execs = latest.valid_execs,
            valid_corpus = latest.valid_corpus,
            worker_corpus = latest.corpus,
            total_edges = latest.total_edges,
            corpus = next.corpus,
            crashes = next.crashes,
        );
    }
    record.replace_status(next);
    failed
}

fn field_failed(record: &WorkerRecord, field: &str, err: &WatchError) {
    warn!(
        event = "refresh_field_failed",
        dir = %record.dir.display(),
        field,
        error = %err,
    );
}
