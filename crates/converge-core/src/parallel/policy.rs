//! Failure-rate classification for a completed batch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Recovery policy selected from a batch's failure rate (`failed / total`).
///
/// Timed-out and cancelled tasks are not failures for this purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// No failures: return every result.
    Success,
    /// Below 20%: return successes, surface failures as warnings, no retry.
    PartialSuccess,
    /// 20% up to (not including) 100%: re-run failed tasks sequentially.
    SequentialRecovery,
    /// Every task failed: abandon the batch and run everything sequentially.
    SystemicFallback,
}

impl BatchPolicy {
    /// Classify a batch with `failed` genuine failures out of `total` tasks.
    pub fn classify(failed: usize, total: usize) -> Self {
        if failed == 0 || total == 0 {
            BatchPolicy::Success
        } else if failed >= total {
            BatchPolicy::SystemicFallback
        } else if failed * 5 < total {
            BatchPolicy::PartialSuccess
        } else {
            BatchPolicy::SequentialRecovery
        }
    }
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchPolicy::Success => "success",
            BatchPolicy::PartialSuccess => "partial_success",
            BatchPolicy::SequentialRecovery => "sequential_recovery",
            BatchPolicy::SystemicFallback => "systemic_fallback",
        };
        write!(f, "{s}")
    }
}
