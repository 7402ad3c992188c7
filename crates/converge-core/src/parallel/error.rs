//! Error types for the parallel coordinator.

use super::report::AggregationReport;
use super::task::{TaskId, TaskStatus};

/// Failure returned by a single operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    /// The operation ran out of a bounded resource (memory, rate limit, quota).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

/// Errors produced by the coordinator itself.
///
/// Task timeouts and individual task failures are reported in the
/// [`AggregationReport`], never raised.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(
        "systemic batch failure: all {total} tasks failed, sequential fallback did not recover (first error: {first_error})"
    )]
    SystemicBatchFailure { total: usize, first_error: String },

    #[error("batch cancelled after {completed} of {total} tasks completed")]
    Cancelled {
        completed: usize,
        total: usize,
        report: Box<AggregationReport>,
    },

    #[error("duplicate task id in batch: {0}")]
    DuplicateTaskId(TaskId),

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
