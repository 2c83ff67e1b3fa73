use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use crate::error::{WatchError, WatchResult};

const HEARTBEAT_SQL: &str = "
    SELECT timestamp, coverage, total_edges, execs, valid_execs, valid_corpus, corpus
    FROM heartbeat
    ORDER BY timestamp
";

/// One row of a worker's `heartbeat` table.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSample {
    /// Seconds since the unix epoch.
    pub timestamp: f64,
    pub coverage: u64,
    pub total_edges: u64,
    pub execs: u64,
    pub valid_execs: u64,
    pub valid_corpus: u64,
    pub corpus: u64,
}

/// `(seconds since worker start, hit edges / total edges)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveragePoint {
    pub time: f64,
    pub fraction: f64,
}

/// Everything the fleet store keeps from one read of a metrics store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageSnapshot {
    pub points: Vec<CoveragePoint>,
    pub latest: Option<HeartbeatSample>,
}

/// Read the full heartbeat series from the store at `path`, oldest first.
/// Blocking; run it off the async executor.
pub fn read_heartbeats(path: &Path) -> WatchResult<Vec<HeartbeatSample>> {
    let store_err = |source| WatchError::MetricsStore {
        path: path.to_path_buf(),
        source,
    };

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(store_err)?;
    let mut statement = conn.prepare(HEARTBEAT_SQL).map_err(store_err)?;
    let rows = statement
        .query_map([], |row| {
            let mut values = Vec::with_capacity(7);
            for idx in 0..7 {
                values.push(row.get::<_, Value>(idx)?);
            }
            Ok(values)
        })
        .map_err(store_err)?;

    let mut samples = Vec::new();
    for (idx, row) in rows.enumerate() {
        let values = row.map_err(store_err)?;
        samples.push(decode_row(path, idx, &values)?);
    }
    // text and numeric timestamps do not collate together in SQL
    samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    Ok(samples)
}

/// Turn a heartbeat series into coverage ratios relative to `start_time`.
///
/// The newest row's `total_edges` is the denominator for every point: the
/// instrumentation size is fixed for the life of a worker even though each
/// row repeats it.
pub fn coverage_series(samples: &[HeartbeatSample], start_time: i64) -> Vec<CoveragePoint> {
    let Some(latest) = samples.last() else {
        return Vec::new();
    };
    let total = latest.total_edges as f64;
    samples
        .iter()
        .map(|sample| CoveragePoint {
            time: (sample.timestamp - start_time as f64).max(0.0),
            fraction: if total > 0.0 {
                (sample.coverage as f64 / total).clamp(0.0, 1.0)
            } else {
                0.0
            },
        })
        .collect()
}

/// Read a store and derive its coverage series in one go.
pub fn read_coverage(path: &Path, start_time: i64) -> WatchResult<CoverageSnapshot> {
    let samples = read_heartbeats(path)?;
    Ok(CoverageSnapshot {
        points: coverage_series(&samples, start_time),
        latest: samples.last().cloned(),
    })
}

fn decode_row(path: &Path, row: usize, values: &[Value]) -> WatchResult<HeartbeatSample> {
    let malformed = |reason: String| WatchError::RowMalformed {
        path: path.to_path_buf(),
        row,
        reason,
    };
    let counter = |idx: usize, name: &str| match &values[idx] {
        Value::Integer(v) if *v >= 0 => Ok(*v as u64),
        // untyped columns can hand back whole numbers as REAL
        Value::Real(v) if v.is_finite() && *v >= 0.0 && v.fract() == 0.0 => Ok(*v as u64),
        other => Err(malformed(format!("bad {name} value {other:?}"))),
    };

    Ok(HeartbeatSample {
        timestamp: decode_timestamp(&values[0]).ok_or_else(|| {
            malformed(format!("bad timestamp value {:?}", values[0]))
        })?,
        coverage: counter(1, "coverage")?,
        total_edges: counter(2, "total_edges")?,
        execs: counter(3, "execs")?,
        valid_execs: counter(4, "valid_execs")?,
        valid_corpus: counter(5, "valid_corpus")?,
        corpus: counter(6, "corpus")?,
    })
}

/// Unix seconds stored as a number, or a rendered UTC timestamp.
fn decode_timestamp(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(secs) => Some(*secs as f64),
        Value::Real(secs) if secs.is_finite() => Some(*secs),
        Value::Text(text) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                return Some(ts.timestamp() as f64);
            }
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ts| ts.and_utc().timestamp() as f64)
        }
        _ => None,
    }
}
