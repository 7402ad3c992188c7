//! Fan-out / fan-in execution of independent operations.
//!
//! Every operation in a batch is spawned at once, bounded by its own timeout
//! budget, and isolated from panics in its siblings. Once all tasks are
//! terminal the batch failure rate selects a [`BatchPolicy`], recovery runs
//! sequentially where the policy asks for it, and conflicts are detected over
//! the final outputs.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::conflict::{detect_conflicts, ConflictKind, Resolution};
use super::error::{CoordinatorError, CoordinatorResult, TaskError};
use super::policy::BatchPolicy;
use super::report::AggregationReport;
use super::retry::retry_with_backoff;
use super::task::{Operation, Task, TaskId, TaskOutput, TaskRecord, TaskStatus};
use crate::metrics::METRICS;
use crate::obs;

/// Execution controls for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Timeout budget for one execution of one operation (milliseconds).
    pub per_task_timeout_ms: u64,
    /// Attempts per failed task during sequential recovery.
    pub max_retry_attempts: u32,
    /// Base unit for exponential backoff between recovery attempts (milliseconds).
    pub backoff_unit_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            per_task_timeout_ms: 300_000,
            max_retry_attempts: 3,
            backoff_unit_ms: 1_000,
        }
    }
}

impl BatchConfig {
    pub fn per_task_timeout(&self) -> Duration {
        Duration::from_millis(self.per_task_timeout_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

enum Outcome {
    Succeeded(TaskOutput),
    Failed(TaskError),
    TimedOut,
    Cancelled,
}

impl Outcome {
    fn status(&self) -> TaskStatus {
        match self {
            Outcome::Succeeded(_) => TaskStatus::Succeeded,
            Outcome::Failed(_) => TaskStatus::Failed,
            Outcome::TimedOut => TaskStatus::TimedOut,
            Outcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

struct Execution {
    outcome: Outcome,
    attempts: u32,
    duration_ms: u64,
    completion_seq: u64,
    recovered: bool,
}

impl Execution {
    fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Why a single recovery attempt did not succeed.
enum AttemptError {
    Failed(TaskError),
    TimedOut(Duration),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(e) => write!(f, "{e}"),
            AttemptError::TimedOut(budget) => write!(f, "timed out after {}ms", budget.as_millis()),
        }
    }
}

/// Runs batches of operations under one [`BatchConfig`].
#[derive(Debug, Clone, Default)]
pub struct ParallelCoordinator {
    config: BatchConfig,
}

impl ParallelCoordinator {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `operations` concurrently and aggregate their results.
    ///
    /// Individual failures and timeouts are reported, not raised. Errors are
    /// returned for duplicate task ids, cancellation (carrying the partial
    /// report) and a batch that still fails completely after the sequential
    /// fallback.
    #[instrument(skip_all, fields(total = operations.len()))]
    pub async fn run(
        &self,
        operations: Vec<Operation>,
        cancel: &CancellationToken,
    ) -> CoordinatorResult<AggregationReport> {
        let started = Instant::now();
        let total = operations.len();
        if total == 0 {
            return Ok(AggregationReport::empty());
        }

        let mut tasks: BTreeMap<TaskId, Task> = BTreeMap::new();
        for op in &operations {
            if tasks.contains_key(op.id()) {
                return Err(CoordinatorError::DuplicateTaskId(op.id().clone()));
            }
            let budget = op.timeout().unwrap_or_else(|| self.config.per_task_timeout());
            tasks.insert(op.id().clone(), Task::new(op.id().clone(), budget));
        }

        let seq = Arc::new(AtomicU64::new(0));
        let mut executions = fan_out(&operations, &tasks, cancel, &seq).await;

        let cancelled = executions
            .values()
            .filter(|e| matches!(e.outcome, Outcome::Cancelled))
            .count();
        let failed = executions.values().filter(|e| e.is_failure()).count();
        let policy = BatchPolicy::classify(failed, total);

        if cancelled > 0 {
            let records = finalize(&mut tasks, executions)?;
            let report = aggregate(records, policy, Vec::new(), started);
            warn!(cancelled, total, "batch cancelled, skipping recovery");
            return Err(CoordinatorError::Cancelled {
                completed: total - cancelled,
                total,
                report: Box::new(report),
            });
        }

        debug!(failed, total, policy = %policy, "batch classified");

        let mut warnings = Vec::new();
        let mut representative_error = None;
        let by_id: BTreeMap<&TaskId, &Operation> = operations.iter().map(|op| (op.id(), op)).collect();

        let interrupted = match policy {
            BatchPolicy::Success => false,
            BatchPolicy::PartialSuccess => {
                for (id, execution) in &executions {
                    if let Outcome::Failed(err) = &execution.outcome {
                        warnings.push(format!("task {id} failed: {err}"));
                    }
                }
                false
            }
            BatchPolicy::SequentialRecovery => {
                self.recover_sequentially(&by_id, &tasks, &mut executions, &seq, cancel)
                    .await
            }
            BatchPolicy::SystemicFallback => {
                let first_error = executions
                    .values()
                    .filter_map(|e| match &e.outcome {
                        Outcome::Failed(err) => Some((e.completion_seq, err.to_string())),
                        _ => None,
                    })
                    .min_by_key(|(seq, _)| *seq)
                    .map(|(_, err)| err)
                    .unwrap_or_default();
                warn!(total, first_error = %first_error, "systemic batch failure, falling back to sequential execution");

                let interrupted = self
                    .fall_back_sequentially(&by_id, &tasks, &mut executions, &seq, cancel)
                    .await;

                if !interrupted {
                    let any_succeeded = executions
                        .values()
                        .any(|e| matches!(e.outcome, Outcome::Succeeded(_)));
                    if !any_succeeded {
                        METRICS.inc_batches();
                        return Err(CoordinatorError::SystemicBatchFailure { total, first_error });
                    }
                    warnings.push(format!("batch fell back to sequential execution: {first_error}"));
                }
                representative_error = Some(first_error);
                interrupted
            }
        };

        if interrupted {
            let cancelled = executions
                .values()
                .filter(|e| matches!(e.outcome, Outcome::Cancelled))
                .count();
            let records = finalize(&mut tasks, executions)?;
            let mut report = aggregate(records, policy, warnings, started);
            report.representative_error = representative_error;
            warn!(cancelled, total, policy = %policy, "batch cancelled during recovery");
            return Err(CoordinatorError::Cancelled {
                completed: total - cancelled,
                total,
                report: Box::new(report),
            });
        }

        for (id, execution) in &executions {
            if matches!(execution.outcome, Outcome::TimedOut) {
                warnings.push(format!("task {id} timed out after {}ms", tasks[id].timeout().as_millis()));
            }
        }
        if policy == BatchPolicy::SequentialRecovery {
            for (id, execution) in &executions {
                if let Outcome::Failed(err) = &execution.outcome {
                    warnings.push(format!("task {id} still failing after recovery: {err}"));
                }
            }
        }

        let records = finalize(&mut tasks, executions)?;
        let mut report = aggregate(records, policy, warnings, started);
        report.representative_error = representative_error;
        Ok(report)
    }

    /// Re-run failed tasks one at a time with backoff. Returns true when
    /// cancelled; the interrupted task and those not yet retried end cancelled.
    async fn recover_sequentially(
        &self,
        operations: &BTreeMap<&TaskId, &Operation>,
        tasks: &BTreeMap<TaskId, Task>,
        executions: &mut BTreeMap<TaskId, Execution>,
        seq: &AtomicU64,
        cancel: &CancellationToken,
    ) -> bool {
        let failed_ids: Vec<TaskId> = executions
            .iter()
            .filter(|(_, e)| e.is_failure())
            .map(|(id, _)| id.clone())
            .collect();

        for (index, id) in failed_ids.iter().enumerate() {
            let Some(op) = operations.get(id) else {
                continue;
            };
            let budget = tasks[id].timeout();
            let started = Instant::now();
            let mut attempts = 0u32;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = retry_with_backoff(
                    self.config.max_retry_attempts,
                    self.config.backoff_unit(),
                    |attempt| {
                        attempts = attempt;
                        let op = (*op).clone();
                        async move {
                            match run_guarded(&op, budget).await {
                                Outcome::Succeeded(output) => Ok(output),
                                Outcome::Failed(err) => Err(AttemptError::Failed(err)),
                                _ => Err(AttemptError::TimedOut(budget)),
                            }
                        }
                    },
                ) => Some(result),
            };

            let Some(execution) = executions.get_mut(id) else {
                continue;
            };
            execution.attempts += attempts;
            execution.duration_ms += elapsed_ms(started);
            let Some(result) = result else {
                warn!(task_id = %id, "cancelled during recovery");
                cancel_remaining(&failed_ids[index..], executions, seq);
                return true;
            };

            execution.completion_seq = seq.fetch_add(1, Ordering::SeqCst) + 1;
            execution.outcome = match result {
                Ok(output) => {
                    debug!(task_id = %id, attempts, "task recovered");
                    execution.recovered = true;
                    Outcome::Succeeded(output)
                }
                Err(AttemptError::Failed(err)) => Outcome::Failed(err),
                Err(AttemptError::TimedOut(_)) => Outcome::TimedOut,
            };
        }
        false
    }

    /// Re-run the whole batch one task at a time. Returns true when cancelled;
    /// the interrupted task and those not yet re-run end cancelled.
    async fn fall_back_sequentially(
        &self,
        operations: &BTreeMap<&TaskId, &Operation>,
        tasks: &BTreeMap<TaskId, Task>,
        executions: &mut BTreeMap<TaskId, Execution>,
        seq: &AtomicU64,
        cancel: &CancellationToken,
    ) -> bool {
        let ids: Vec<TaskId> = operations.keys().map(|id| (*id).clone()).collect();

        for (index, id) in ids.iter().enumerate() {
            let Some(op) = operations.get(id) else {
                continue;
            };
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = run_guarded(op, tasks[id].timeout()) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                warn!(task_id = %id, "cancelled during fallback");
                cancel_remaining(&ids[index..], executions, seq);
                return true;
            };

            let Some(execution) = executions.get_mut(id) else {
                continue;
            };
            execution.attempts += 1;
            execution.duration_ms += elapsed_ms(started);
            execution.completion_seq = seq.fetch_add(1, Ordering::SeqCst) + 1;
            execution.recovered = matches!(outcome, Outcome::Succeeded(_));
            execution.outcome = outcome;
        }
        false
    }
}

/// Mark `ids` cancelled, in order.
fn cancel_remaining(ids: &[TaskId], executions: &mut BTreeMap<TaskId, Execution>, seq: &AtomicU64) {
    for id in ids {
        if let Some(execution) = executions.get_mut(id) {
            execution.outcome = Outcome::Cancelled;
            execution.recovered = false;
            execution.completion_seq = seq.fetch_add(1, Ordering::SeqCst) + 1;
        }
    }
}

/// Run a batch with the default backoff unit and a fresh cancellation token.
pub async fn run_parallel_batch(
    operations: Vec<Operation>,
    per_task_timeout: Duration,
    max_retry_attempts: u32,
) -> CoordinatorResult<AggregationReport> {
    let config = BatchConfig {
        per_task_timeout_ms: per_task_timeout.as_millis() as u64,
        max_retry_attempts,
        ..BatchConfig::default()
    };
    ParallelCoordinator::new(config)
        .run(operations, &CancellationToken::new())
        .await
}

async fn fan_out(
    operations: &[Operation],
    tasks: &BTreeMap<TaskId, Task>,
    cancel: &CancellationToken,
    seq: &Arc<AtomicU64>,
) -> BTreeMap<TaskId, Execution> {
    let mut set = JoinSet::new();

    for op in operations {
        let op = op.clone();
        let budget = tasks[op.id()].timeout();
        let cancel = cancel.clone();
        let seq = Arc::clone(seq);

        set.spawn(async move {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                outcome = run_guarded(&op, budget) => outcome,
            };
            let execution = Execution {
                outcome,
                attempts: 1,
                duration_ms: elapsed_ms(started),
                completion_seq: seq.fetch_add(1, Ordering::SeqCst) + 1,
                recovered: false,
            };
            (op.id().clone(), execution)
        });
    }

    let mut executions = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((id, execution)) => {
                executions.insert(id, execution);
            }
            Err(e) => warn!(error = %e, "batch task did not return"),
        }
    }

    for op in operations {
        executions.entry(op.id().clone()).or_insert_with(|| Execution {
            outcome: Outcome::Failed(TaskError::failed("task aborted")),
            attempts: 1,
            duration_ms: 0,
            completion_seq: seq.fetch_add(1, Ordering::SeqCst) + 1,
            recovered: false,
        });
    }
    executions
}

/// One execution of `op` under `budget`, with panics turned into failures.
async fn run_guarded(op: &Operation, budget: Duration) -> Outcome {
    let guarded = AssertUnwindSafe(async { op.execute().await }).catch_unwind();
    match tokio::time::timeout(budget, guarded).await {
        Err(_) => Outcome::TimedOut,
        Ok(Err(panic)) => Outcome::Failed(TaskError::failed(format!(
            "task panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Ok(Ok(Ok(output))) => Outcome::Succeeded(output),
        Ok(Ok(Err(err))) => Outcome::Failed(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Move every task to its terminal status exactly once and build its record.
fn finalize(
    tasks: &mut BTreeMap<TaskId, Task>,
    executions: BTreeMap<TaskId, Execution>,
) -> CoordinatorResult<Vec<TaskRecord>> {
    let mut records = Vec::with_capacity(executions.len());
    for (id, execution) in executions {
        let status = execution.outcome.status();
        if let Some(task) = tasks.get_mut(&id) {
            task.transition(status)?;
        }

        let (output, error, resource_exhausted) = match execution.outcome {
            Outcome::Succeeded(output) => (Some(output), None, false),
            Outcome::Failed(err) => (None, Some(err.to_string()), err.is_resource_exhausted()),
            Outcome::TimedOut => (None, Some("timed out".to_string()), false),
            Outcome::Cancelled => (None, Some("cancelled".to_string()), false),
        };

        records.push(TaskRecord {
            id,
            status,
            attempts: execution.attempts,
            output,
            error,
            resource_exhausted,
            recovered: execution.recovered,
            duration_ms: execution.duration_ms,
            completion_seq: execution.completion_seq,
        });
    }
    Ok(records)
}

fn aggregate(
    records: Vec<TaskRecord>,
    policy: BatchPolicy,
    mut warnings: Vec<String>,
    started: Instant,
) -> AggregationReport {
    let conflicts = detect_conflicts(&records, records.len());
    let mut report = AggregationReport::from_records(records, policy, elapsed_ms(started));

    for conflict in &conflicts {
        match (&conflict.kind, &conflict.resolution) {
            (ConflictKind::WriteRace, Resolution::LastCompletedWins { winner }) => warnings.push(
                format!("write race on {}: {winner} completed last and wins", conflict.subject),
            ),
            (ConflictKind::DuplicateIdentity, _) => warnings.push(format!(
                "duplicate identity {} produced by {} tasks, renamed for review",
                conflict.subject,
                conflict.task_ids.len()
            )),
            (ConflictKind::DependencyViolation, Resolution::BlockDependent { blocked }) => warnings
                .push(format!(
                    "{blocked} depends on removed entity {}, blocked",
                    conflict.subject
                )),
            (ConflictKind::ResourceExceeded, Resolution::ShrinkBatch { next_batch_size }) => {
                report.recommended_batch_size = Some(*next_batch_size);
            }
            _ => {}
        }
    }
    report.conflicts = conflicts;
    report.warnings = warnings;

    METRICS.inc_batches();
    for _ in 0..report.timed_out {
        METRICS.inc_tasks_timed_out();
    }
    obs::emit_batch_aggregated(
        report.total,
        report.succeeded,
        report.failed,
        report.timed_out,
        &report.policy.to_string(),
        report.wall_clock_ms,
    );
    report
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
