//! Tunables for one convergence run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ISSUE_HISTORY_KEY, SUBJECT_ID_KEY};
use crate::loop_guard::{PivotAction, DEFAULT_FIX_ATTEMPT_LIMIT};

use super::error::{ConvergenceError, ControllerResult};

/// Convergence policy. Every field has a default, so a partial TOML table is
/// enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergencePolicy {
    /// Consecutive clean passes, each by a distinct methodology, needed to converge.
    pub required_clean_passes: u32,
    /// Hard cap on passes per run.
    pub max_iterations: u32,
    /// Drop transient context between passes, keeping `preserved_context_keys`.
    pub clear_context_between_passes: bool,
    /// Fix attempts per issue identity before the loop guard pivots it.
    pub per_issue_fix_attempt_limit: u32,
    pub preserved_context_keys: Vec<String>,
    pub pivot_action: PivotAction,
    /// End the run as soon as an issue pivots.
    pub halt_on_escalation: bool,
    /// Attempts per fix invocation, with exponential backoff in between.
    pub fix_retry_attempts: u32,
    pub fix_timeout_ms: u64,
    pub backoff_unit_ms: u64,
    /// Timeout budget for each sub-check dispatched through the coordinator.
    pub sub_check_timeout_ms: u64,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            required_clean_passes: 3,
            max_iterations: 10,
            clear_context_between_passes: false,
            per_issue_fix_attempt_limit: DEFAULT_FIX_ATTEMPT_LIMIT,
            preserved_context_keys: vec![SUBJECT_ID_KEY.to_string(), ISSUE_HISTORY_KEY.to_string()],
            pivot_action: PivotAction::Escalate,
            halt_on_escalation: false,
            fix_retry_attempts: 3,
            fix_timeout_ms: 300_000,
            backoff_unit_ms: 1_000,
            sub_check_timeout_ms: 300_000,
        }
    }
}

impl ConvergencePolicy {
    /// Reject policies that could never converge or never terminate cleanly.
    pub fn validate(&self) -> ControllerResult<()> {
        let invalid = |msg: String| Err(ConvergenceError::InvalidPolicy(msg));

        if self.required_clean_passes == 0 {
            return invalid("required_clean_passes must be at least 1".to_string());
        }
        if self.max_iterations < self.required_clean_passes {
            return invalid(format!(
                "max_iterations ({}) must be >= required_clean_passes ({})",
                self.max_iterations, self.required_clean_passes
            ));
        }
        if self.per_issue_fix_attempt_limit == 0 {
            return invalid("per_issue_fix_attempt_limit must be at least 1".to_string());
        }
        if self.fix_retry_attempts == 0 {
            return invalid("fix_retry_attempts must be at least 1".to_string());
        }
        if self.fix_timeout_ms == 0 || self.sub_check_timeout_ms == 0 {
            return invalid("timeouts must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn sub_check_timeout(&self) -> Duration {
        Duration::from_millis(self.sub_check_timeout_ms)
    }
}
