//! Tasks, operations and their outputs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::error::{CoordinatorError, CoordinatorResult, TaskError};

/// Identifier of a task inside one batch. Reports are ordered by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        TaskId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// What a successful operation produced.
///
/// Besides the opaque `value`, an operation declares the named artifacts it
/// produced, the targets it wrote, the entities it removed and the entities it
/// relied on. The coordinator uses these declarations for post-hoc conflict
/// detection; it never inspects `value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl TaskOutput {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn producing(mut self, artifact: impl Into<String>) -> Self {
        self.produces.push(artifact.into());
        self
    }

    pub fn writing(mut self, target: impl Into<String>) -> Self {
        self.writes.push(target.into());
        self
    }

    pub fn removing(mut self, entity: impl Into<String>) -> Self {
        self.removes.push(entity.into());
        self
    }

    pub fn depending_on(mut self, entity: impl Into<String>) -> Self {
        self.depends_on.push(entity.into());
        self
    }
}

/// Boxed future returned by an [`Operation`].
pub type OperationFuture = BoxFuture<'static, Result<TaskOutput, TaskError>>;

/// An opaque, re-runnable unit of work submitted to the coordinator.
///
/// Operations must not communicate with each other. They may be executed more
/// than once (sequential recovery, systemic fallback).
#[derive(Clone)]
pub struct Operation {
    id: TaskId,
    timeout: Option<Duration>,
    run: Arc<dyn Fn() -> OperationFuture + Send + Sync>,
}

impl Operation {
    pub fn new<F, Fut>(id: impl Into<TaskId>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            timeout: None,
            run: Arc::new(move || Box::pin(run())),
        }
    }

    /// Override the batch-wide timeout budget for this operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn execute(&self) -> OperationFuture {
        (self.run)()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A task created at fan-out time.
///
/// Inputs are immutable; the status moves exactly once from `Pending` to a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    timeout: Duration,
    status: TaskStatus,
}

impl Task {
    pub fn new(id: TaskId, timeout: Duration) -> Self {
        Self {
            id,
            timeout,
            status: TaskStatus::Pending,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Move the task to its terminal status.
    pub fn transition(&mut self, to: TaskStatus) -> CoordinatorResult<()> {
        if self.status.is_terminal() || !to.is_terminal() {
            return Err(CoordinatorError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Per-task entry of an aggregation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Executions of the operation, including recovery attempts.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub resource_exhausted: bool,
    /// Set when the task succeeded only after sequential recovery or fallback.
    #[serde(default)]
    pub recovered: bool,
    pub duration_ms: u64,
    /// Global completion order inside the batch (1-based).
    pub completion_seq: u64,
}
