use std::collections::HashMap;

use serde::Serialize;

use crate::fleet::config::WorkerDescriptor;
use crate::fleet::liveness::Liveness;
use crate::fleet::store::{FleetStore, WorkerStatus};
use crate::metrics::resample::display_series;

/// Workers sharing a project label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectGroup {
    pub name: String,
    pub data: Vec<WorkerEntry>,
}

/// What the dashboard shows for one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerEntry {
    /// The worker's mode, e.g. `bytes` or `graph`.
    pub name: String,
    pub crashes: u64,
    pub corpus: u64,
    pub status: Liveness,
    /// `[time, percent]` pairs.
    pub coverage: Vec<[f64; 2]>,
}

/// Project a worker is shown under: its first label, or a name made up from
/// its pid when it has none.
pub fn group_name(labels: &[String], pid: i32) -> String {
    match labels.first() {
        Some(label) => label.clone(),
        None => format!("fuzzer_{pid}"),
    }
}

/// Build the `/api/projects` payload from the store's current snapshots.
pub fn assemble(store: &FleetStore) -> Vec<ProjectGroup> {
    group_workers(
        store
            .workers()
            .iter()
            .map(|record| (&record.descriptor, record.status())),
    )
}

/// Groups come out in order of first appearance and members in discovery
/// order.
fn group_workers<'a>(
    workers: impl IntoIterator<Item = (&'a WorkerDescriptor, WorkerStatus)>,
) -> Vec<ProjectGroup> {
    let mut groups: Vec<ProjectGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (descriptor, status) in workers {
        let name = group_name(&descriptor.labels, descriptor.pid);
        let slot = *index.entry(name.clone()).or_insert_with(|| {
            groups.push(ProjectGroup {
                name,
                data: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].data.push(WorkerEntry {
            name: descriptor.mode.clone(),
            crashes: status.crashes,
            corpus: status.corpus,
            status: status.liveness,
            coverage: display_series(&status.coverage.points),
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::reader::{CoveragePoint, CoverageSnapshot};
    use std::path::PathBuf;

    fn descriptor(pid: i32, mode: &str, labels: &[&str]) -> WorkerDescriptor {
        WorkerDescriptor {
            pid,
            start_time: 0,
            corpus: PathBuf::from("corpus"),
            crashes: PathBuf::from("crashes"),
            metrics: PathBuf::from("metrics.db"),
            mode: mode.to_string(),
            seed: 0,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn first_label_names_the_group() {
        assert_eq!(group_name(&["libfoo".into(), "extra".into()], 1), "libfoo");
        assert_eq!(group_name(&[], 4242), "fuzzer_4242");
    }

    #[test]
    fn groups_by_first_label_in_discovery_order() {
        let a = descriptor(1, "bytes", &["libfoo"]);
        let b = descriptor(4242, "graph", &[]);
        let c = descriptor(3, "graph", &["libfoo", "extra"]);
        let groups = group_workers([
            (&a, WorkerStatus::default()),
            (&b, WorkerStatus::default()),
            (&c, WorkerStatus::default()),
        ]);

        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["libfoo", "fuzzer_4242"]);
        let modes: Vec<&str> = groups[0].data.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(modes, vec!["bytes", "graph"]);
        assert_eq!(groups[1].data.len(), 1);
    }

    #[test]
    fn entries_carry_counts_and_percentages() {
        let a = descriptor(1, "bytes", &["libfoo"]);
        let status = WorkerStatus {
            liveness: Liveness::Running,
            corpus: 5,
            crashes: 2,
            coverage: CoverageSnapshot {
                points: vec![CoveragePoint {
                    time: 600.0,
                    fraction: 0.25,
                }],
                latest: None,
            },
        };
        let groups = group_workers([(&a, status)]);

        let json = serde_json::to_value(&groups).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "name": "libfoo",
                "data": [{
                    "name": "bytes",
                    "crashes": 2,
                    "corpus": 5,
                    "status": 0,
                    "coverage": [[600.0, 25.0]],
                }],
            }])
        );
    }
}
