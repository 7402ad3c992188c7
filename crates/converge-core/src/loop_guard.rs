//! Per-issue fix attempt accounting.
//!
//! The guard counts how often the fix pipeline was asked to resolve each issue
//! identity. Once an identity reaches the threshold the controller stops
//! sending it and pivots instead: the issue is escalated to the caller or
//! accepted as technical debt. Pivoted issues are never silently dropped.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Issue, IssueId};

/// Default number of fix attempts before an issue pivots.
pub const DEFAULT_FIX_ATTEMPT_LIMIT: u32 = 3;

/// What happens to an issue the fix pipeline could not resolve in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotAction {
    /// Hand the issue back to the caller for a decision.
    #[default]
    Escalate,
    /// Record the issue as known technical debt and keep going. Later passes
    /// that report nothing but accepted debt count as clean.
    AcceptAsDebt,
}

impl fmt::Display for PivotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PivotAction::Escalate => write!(f, "escalate"),
            PivotAction::AcceptAsDebt => write!(f, "accept_as_debt"),
        }
    }
}

/// One issue the loop guard pivoted, as surfaced in the run result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEscalation {
    pub issue: Issue,
    pub attempts: u32,
    pub action: PivotAction,
    /// Pass during which the pivot happened.
    pub pass_index: u32,
}

impl IssueEscalation {
    pub fn reason(&self) -> String {
        format!(
            "issue {} ({}) not resolved after {} fix attempts: {}",
            self.issue.id, self.issue.category, self.attempts, self.action
        )
    }
}

/// Attempt counters and pivot marks for one run.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    threshold: u32,
    attempts: BTreeMap<IssueId, u32>,
    pivoted: BTreeMap<IssueId, PivotAction>,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_FIX_ATTEMPT_LIMIT)
    }
}

impl LoopGuard {
    /// A threshold of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            attempts: BTreeMap::new(),
            pivoted: BTreeMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count one fix attempt for `id` and return the new total.
    pub fn record_attempt(&mut self, id: &IssueId) -> u32 {
        let count = self.attempts.entry(id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, id: &IssueId) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }

    /// True once `id` has used up its fix attempts.
    pub fn should_pivot(&self, id: &IssueId) -> bool {
        self.attempts(id) >= self.threshold
    }

    pub fn mark_pivoted(&mut self, id: &IssueId, action: PivotAction) {
        self.pivoted.insert(id.clone(), action);
    }

    pub fn is_pivoted(&self, id: &IssueId) -> bool {
        self.pivoted.contains_key(id)
    }

    pub fn pivot_action(&self, id: &IssueId) -> Option<PivotAction> {
        self.pivoted.get(id).copied()
    }

    /// Forget the counter of an issue the fix pipeline resolved.
    pub fn record_resolved(&mut self, id: &IssueId) {
        self.attempts.remove(id);
    }

    pub fn pivoted_count(&self) -> usize {
        self.pivoted.len()
    }
}
