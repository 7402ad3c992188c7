//! Structured lifecycle events for convergence runs and batches.
//!
//! - `run_span`: the `converge.run` span every run is instrumented with
//! - `emit_*`: one `info!` event per lifecycle step (`event = "..."` field)
//!
//! Filter with `RUST_LOG`; pass `--json` to the CLI for JSON lines.

use tracing::{info, Span};

/// Span covering one convergence run, tagged with `run_id` and `subject_id`.
///
/// Attach it with [`tracing::Instrument`] so the run future stays `Send`:
///
/// ```ignore
/// drive(...).instrument(run_span(&run_id, &subject.id)).await
/// ```
pub fn run_span(run_id: &str, subject_id: &str) -> Span {
    tracing::info_span!("converge.run", run_id = %run_id, subject_id = %subject_id)
}

/// Emit event: convergence run started.
pub fn emit_run_started(run_id: &str, subject_id: &str, pool_size: usize, required_clean: u32) {
    info!(
        event = "run.started",
        run_id = %run_id,
        subject_id = %subject_id,
        pool_size = pool_size,
        required_clean_passes = required_clean,
    );
}

/// Emit event: one pass finished.
pub fn emit_pass_completed(
    run_id: &str,
    index: u32,
    methodology: &str,
    clean: bool,
    issues: usize,
    consecutive_clean: u32,
) {
    info!(
        event = "pass.completed",
        run_id = %run_id,
        index = index,
        methodology = %methodology,
        clean = clean,
        issues = issues,
        consecutive_clean = consecutive_clean,
    );
}

/// Emit event: a parallel batch was aggregated.
pub fn emit_batch_aggregated(
    total: usize,
    succeeded: usize,
    failed: usize,
    timed_out: usize,
    policy: &str,
    wall_clock_ms: u64,
) {
    info!(
        event = "batch.aggregated",
        total = total,
        succeeded = succeeded,
        failed = failed,
        timed_out = timed_out,
        policy = %policy,
        wall_clock_ms = wall_clock_ms,
    );
}

/// Emit event: the loop guard pivoted an issue (warning level).
pub fn emit_loop_guard_pivot(run_id: &str, issue_id: &str, attempts: u32, action: &str) {
    tracing::warn!(
        event = "loop_guard.pivot",
        run_id = %run_id,
        issue_id = %issue_id,
        attempts = attempts,
        action = %action,
    );
}

/// Emit event: run reached a terminal state.
pub fn emit_run_terminated(
    run_id: &str,
    reason: &str,
    passes: usize,
    total_issues_fixed: usize,
    duration_ms: u64,
) {
    info!(
        event = "run.terminated",
        run_id = %run_id,
        reason = %reason,
        passes = passes,
        total_issues_fixed = total_issues_fixed,
        duration_ms = duration_ms,
    );
}

/// Emit event: a learning store call failed; the run continues (warning level).
pub fn emit_learning_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "learning.error", run_id = %run_id, error = %error);
}
