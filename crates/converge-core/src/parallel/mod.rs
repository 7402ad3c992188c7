//! Parallel task coordinator.
//!
//! Fans out independent operations, bounds each with a timeout, classifies
//! the batch by failure rate, recovers sequentially where needed and reports
//! conflicts found in the outputs.

pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod policy;
pub mod report;
pub mod retry;
pub mod task;

pub use conflict::{detect_conflicts, Conflict, ConflictKind, Resolution};
pub use coordinator::{run_parallel_batch, BatchConfig, ParallelCoordinator};
pub use error::{CoordinatorError, CoordinatorResult, TaskError};
pub use policy::BatchPolicy;
pub use report::AggregationReport;
pub use retry::{backoff_delay, retry_with_backoff};
pub use task::{Operation, OperationFuture, Task, TaskId, TaskOutput, TaskRecord, TaskStatus};
