//! Global atomic counters for convergence runs and parallel batches.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit the current values as one `tracing::info!`
//! event, typically when a run terminates.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocation, no locking.
pub struct Metrics {
    passes_executed: AtomicU64,
    clean_passes: AtomicU64,
    batches_run: AtomicU64,
    tasks_timed_out: AtomicU64,
    loop_guard_pivots: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            passes_executed: AtomicU64::new(0),
            clean_passes: AtomicU64::new(0),
            batches_run: AtomicU64::new(0),
            tasks_timed_out: AtomicU64::new(0),
            loop_guard_pivots: AtomicU64::new(0),
        }
    }

    pub fn inc_passes(&self) {
        self.passes_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "passes_executed", "counter incremented");
    }

    pub fn inc_clean_passes(&self) {
        self.clean_passes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "clean_passes", "counter incremented");
    }

    pub fn inc_batches(&self) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_run", "counter incremented");
    }

    pub fn inc_tasks_timed_out(&self) {
        self.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_timed_out", "counter incremented");
    }

    pub fn inc_pivots(&self) {
        self.loop_guard_pivots.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "loop_guard_pivots", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            passes_executed = self.passes_executed(),
            clean_passes = self.clean_passes(),
            batches_run = self.batches_run(),
            tasks_timed_out = self.tasks_timed_out(),
            loop_guard_pivots = self.loop_guard_pivots(),
        );
    }

    pub fn passes_executed(&self) -> u64 {
        self.passes_executed.load(Ordering::Relaxed)
    }

    pub fn clean_passes(&self) -> u64 {
        self.clean_passes.load(Ordering::Relaxed)
    }

    pub fn batches_run(&self) -> u64 {
        self.batches_run.load(Ordering::Relaxed)
    }

    pub fn tasks_timed_out(&self) -> u64 {
        self.tasks_timed_out.load(Ordering::Relaxed)
    }

    pub fn loop_guard_pivots(&self) -> u64 {
        self.loop_guard_pivots.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.passes_executed.store(0, Ordering::Relaxed);
        self.clean_passes.store(0, Ordering::Relaxed);
        self.batches_run.store(0, Ordering::Relaxed);
        self.tasks_timed_out.store(0, Ordering::Relaxed);
        self.loop_guard_pivots.store(0, Ordering::Relaxed);
    }
}
