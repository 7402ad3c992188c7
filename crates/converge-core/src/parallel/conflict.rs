//! Post-hoc conflict detection over task outputs.
//!
//! Tasks never communicate while they run, so conflicts can only be found
//! after the fact by comparing what each task declared it produced, wrote,
//! removed and relied on. Every conflict carries a suggested resolution; the
//! coordinator never applies resolutions itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::task::{TaskId, TaskRecord, TaskStatus};

/// Category of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    DuplicateIdentity,
    WriteRace,
    DependencyViolation,
    ResourceExceeded,
}

/// Suggested way to settle a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Resolution {
    /// Keep `keep`'s identity; rename the others and flag them for review.
    RenameWithSuffix {
        keep: TaskId,
        renames: Vec<(TaskId, String)>,
    },
    /// The write completed last stands; the others are overwritten.
    LastCompletedWins { winner: TaskId },
    /// The dependent operation must not be applied.
    BlockDependent { blocked: TaskId },
    /// Run the next batch with fewer concurrent tasks.
    ShrinkBatch { next_batch_size: usize },
}

/// One conflict found during aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Involved tasks, ordered by id.
    pub task_ids: Vec<TaskId>,
    /// The artifact, target or entity the conflict is about.
    pub subject: String,
    pub resolution: Resolution,
}

/// Scan completed task records for conflicts.
///
/// `batch_size` is the number of tasks launched together; it drives the
/// shrink recommendation for resource exhaustion. Output is deterministic:
/// conflicts are grouped by kind and ordered by subject.
pub fn detect_conflicts(records: &[TaskRecord], batch_size: usize) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    let succeeded: Vec<&TaskRecord> = records
        .iter()
        .filter(|r| r.status == TaskStatus::Succeeded && r.output.is_some())
        .collect();

    conflicts.extend(duplicate_identities(&succeeded));
    conflicts.extend(write_races(&succeeded));
    conflicts.extend(dependency_violations(&succeeded));
    conflicts.extend(resource_exceeded(records, batch_size));

    conflicts
}

/// Next batch size to use when a batch exhausted resources.
pub fn shrunk_batch_size(batch_size: usize) -> usize {
    (batch_size / 2).max(1)
}

fn index_by<'a, F>(records: &[&'a TaskRecord], field: F) -> BTreeMap<String, Vec<&'a TaskRecord>>
where
    F: Fn(&'a TaskRecord) -> &'a [String],
{
    let mut index: BTreeMap<String, Vec<&'a TaskRecord>> = BTreeMap::new();
    for record in records {
        for key in field(record) {
            let entry = index.entry(key.clone()).or_default();
            if !entry.iter().any(|r| r.id == record.id) {
                entry.push(record);
            }
        }
    }
    for tasks in index.values_mut() {
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
    }
    index
}

fn duplicate_identities(records: &[&TaskRecord]) -> Vec<Conflict> {
    index_by(records, |r| r.output.as_ref().map(|o| o.produces.as_slice()).unwrap_or(&[]))
        .into_iter()
        .filter(|(_, tasks)| tasks.len() > 1)
        .map(|(artifact, tasks)| {
            let keep = tasks[0].id.clone();
            let renames = tasks[1..]
                .iter()
                .map(|t| (t.id.clone(), format!("{artifact}-{}", t.id)))
                .collect();
            Conflict {
                kind: ConflictKind::DuplicateIdentity,
                task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
                subject: artifact,
                resolution: Resolution::RenameWithSuffix { keep, renames },
            }
        })
        .collect()
}

fn write_races(records: &[&TaskRecord]) -> Vec<Conflict> {
    index_by(records, |r| r.output.as_ref().map(|o| o.writes.as_slice()).unwrap_or(&[]))
        .into_iter()
        .filter(|(_, tasks)| tasks.len() > 1)
        .map(|(target, tasks)| {
            let winner = tasks
                .iter()
                .max_by_key(|t| t.completion_seq)
                .map(|t| t.id.clone())
                .unwrap_or_else(|| tasks[0].id.clone());
            Conflict {
                kind: ConflictKind::WriteRace,
                task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
                subject: target,
                resolution: Resolution::LastCompletedWins { winner },
            }
        })
        .collect()
}

fn dependency_violations(records: &[&TaskRecord]) -> Vec<Conflict> {
    let removers = index_by(records, |r| {
        r.output.as_ref().map(|o| o.removes.as_slice()).unwrap_or(&[])
    });
    let dependents = index_by(records, |r| {
        r.output.as_ref().map(|o| o.depends_on.as_slice()).unwrap_or(&[])
    });

    let mut conflicts = Vec::new();
    for (entity, dependent_tasks) in &dependents {
        let Some(removing_tasks) = removers.get(entity) else {
            continue;
        };
        for dependent in dependent_tasks {
            for remover in removing_tasks.iter().filter(|r| r.id != dependent.id) {
                let mut task_ids = vec![dependent.id.clone(), remover.id.clone()];
                task_ids.sort();
                conflicts.push(Conflict {
                    kind: ConflictKind::DependencyViolation,
                    task_ids,
                    subject: entity.clone(),
                    resolution: Resolution::BlockDependent {
                        blocked: dependent.id.clone(),
                    },
                });
            }
        }
    }
    conflicts
}

fn resource_exceeded(records: &[TaskRecord], batch_size: usize) -> Vec<Conflict> {
    let mut task_ids: Vec<TaskId> = records
        .iter()
        .filter(|r| r.resource_exhausted && r.status != TaskStatus::Succeeded)
        .map(|r| r.id.clone())
        .collect();
    if task_ids.is_empty() {
        return Vec::new();
    }
    task_ids.sort();
    vec![Conflict {
        kind: ConflictKind::ResourceExceeded,
        task_ids,
        subject: "batch".to_string(),
        resolution: Resolution::ShrinkBatch {
            next_batch_size: shrunk_batch_size(batch_size),
        },
    }]
}
