//! Aggregated result of one parallel batch.

use serde::{Deserialize, Serialize};

use super::conflict::Conflict;
use super::policy::BatchPolicy;
use super::task::{TaskId, TaskOutput, TaskRecord, TaskStatus};

/// Read-only summary of a finished batch.
///
/// Counts reflect final task statuses, after any recovery policy ran.
/// `tasks` is ordered by task id regardless of completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    /// Policy chosen from the initial parallel run.
    pub policy: BatchPolicy,
    pub conflicts: Vec<Conflict>,
    pub tasks: Vec<TaskRecord>,
    pub warnings: Vec<String>,
    /// First error seen when the whole batch failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representative_error: Option<String>,
    /// Smaller batch size to use next time, set when resources ran out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_batch_size: Option<usize>,
    pub wall_clock_ms: u64,
}

impl AggregationReport {
    /// Report for a batch with no operations.
    pub fn empty() -> Self {
        Self::from_records(Vec::new(), BatchPolicy::Success, 0)
    }

    /// Build a report from final task records, counting statuses.
    pub fn from_records(mut tasks: Vec<TaskRecord>, policy: BatchPolicy, wall_clock_ms: u64) -> Self {
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();

        Self {
            total: tasks.len(),
            succeeded: count(TaskStatus::Succeeded),
            failed: count(TaskStatus::Failed),
            timed_out: count(TaskStatus::TimedOut),
            cancelled: count(TaskStatus::Cancelled),
            policy,
            conflicts: Vec::new(),
            tasks,
            warnings: Vec::new(),
            representative_error: None,
            recommended_batch_size: None,
            wall_clock_ms,
        }
    }

    /// Final failure rate: `failed / total`, zero for an empty batch.
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    pub fn is_fully_successful(&self) -> bool {
        self.succeeded == self.total
    }

    /// Successful outputs in task id order.
    pub fn successes(&self) -> impl Iterator<Item = (&TaskId, &TaskOutput)> {
        self.tasks.iter().filter_map(|t| match (&t.status, &t.output) {
            (TaskStatus::Succeeded, Some(output)) => Some((&t.id, output)),
            _ => None,
        })
    }

    pub fn record(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn output(&self, id: &TaskId) -> Option<&TaskOutput> {
        self.record(id).and_then(|t| t.output.as_ref())
    }
}
