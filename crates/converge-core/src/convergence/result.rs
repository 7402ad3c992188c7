//! What a convergence run hands back to its caller.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Issue, Severity};
use crate::fix::FixError;
use crate::loop_guard::{IssueEscalation, PivotAction};

use super::error::{ConvergenceError, ControllerResult};
use super::state::{ControllerState, OutstandingIssue, PassRecord};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Converged,
    Exhausted,
    Cancelled,
    FixPipelineFailed,
    LoopGuardPivot,
}

impl TerminationReason {
    /// Terminal controller state this reason ends in.
    pub fn terminal_state(self) -> ControllerState {
        match self {
            TerminationReason::Converged => ControllerState::Converged,
            TerminationReason::Exhausted => ControllerState::Exhausted,
            TerminationReason::Cancelled
            | TerminationReason::FixPipelineFailed
            | TerminationReason::LoopGuardPivot => ControllerState::Escalated,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::Converged => "converged",
            TerminationReason::Exhausted => "exhausted",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::FixPipelineFailed => "fix_pipeline_failed",
            TerminationReason::LoopGuardPivot => "loop_guard_pivot",
        };
        f.write_str(s)
    }
}

/// Issue counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn from_issues<'a, I>(issues: I) -> Self
    where
        I: IntoIterator<Item = &'a Issue>,
    {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

impl fmt::Display for SeverityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} critical, {} high, {} medium, {} low",
            self.critical, self.high, self.medium, self.low
        )
    }
}

/// Human-readable digest attached to every terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub termination_reason: TerminationReason,
    pub passes_executed: usize,
    pub clean_passes: usize,
    pub methodologies_exercised: BTreeSet<String>,
    /// Every issue reported across all passes.
    pub issues_found: SeverityCounts,
    pub outstanding: SeverityCounts,
    pub total_issues_fixed: usize,
    pub escalations: usize,
}

impl RunSummary {
    pub fn build(
        reason: TerminationReason,
        passes: &[PassRecord],
        outstanding: &[OutstandingIssue],
        total_issues_fixed: usize,
        escalations: usize,
    ) -> Self {
        Self {
            termination_reason: reason,
            passes_executed: passes.len(),
            clean_passes: passes.iter().filter(|p| p.clean).count(),
            methodologies_exercised: passes.iter().map(|p| p.methodology.clone()).collect(),
            issues_found: SeverityCounts::from_issues(passes.iter().flat_map(|p| &p.issues)),
            outstanding: SeverityCounts::from_issues(outstanding.iter().map(|o| &o.issue)),
            total_issues_fixed,
            escalations,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methodologies: Vec<&str> = self.methodologies_exercised.iter().map(String::as_str).collect();
        writeln!(
            f,
            "{} after {} passes ({} clean)",
            self.termination_reason, self.passes_executed, self.clean_passes
        )?;
        writeln!(f, "methodologies: {}", methodologies.join(", "))?;
        writeln!(f, "issues found: {}", self.issues_found)?;
        writeln!(f, "issues fixed: {}", self.total_issues_fixed)?;
        writeln!(f, "outstanding: {}", self.outstanding)?;
        write!(f, "escalations: {}", self.escalations)
    }
}

/// Final report of one convergence run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub run_id: String,
    pub subject_id: String,
    pub converged: bool,
    pub state: ControllerState,
    pub termination_reason: TerminationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    pub passes: Vec<PassRecord>,
    pub total_issues_fixed: usize,
    pub outstanding_issues: Vec<OutstandingIssue>,
    pub escalations: Vec<IssueEscalation>,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ConvergenceResult {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Convert a non-converged run into the matching error.
    pub fn into_result(self) -> ControllerResult<Self> {
        match self.termination_reason {
            TerminationReason::Converged => Ok(self),
            TerminationReason::Exhausted => Err(ConvergenceError::ConvergenceExhausted {
                passes: self.passes.len(),
                outstanding: self.outstanding_issues.len(),
            }),
            TerminationReason::Cancelled => Err(ConvergenceError::Cancelled {
                passes: self.passes.len(),
            }),
            TerminationReason::FixPipelineFailed => Err(ConvergenceError::FixPipeline(
                FixError::Failed(self.escalation_reason.unwrap_or_default()),
            )),
            TerminationReason::LoopGuardPivot => {
                let escalation = self
                    .escalations
                    .into_iter()
                    .find(|e| e.action == PivotAction::Escalate);
                match escalation {
                    Some(e) => Err(e.into()),
                    None => Err(ConvergenceError::InvalidPolicy(
                        "run halted on a pivot without an escalation".to_string(),
                    )),
                }
            }
        }
    }
}
