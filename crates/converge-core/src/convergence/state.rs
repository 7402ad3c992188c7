//! Per-run working memory of the convergence controller.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Issue, IssueId};
use crate::loop_guard::{LoopGuard, PivotAction};

use super::error::{ConvergenceError, ControllerResult};

/// Controller lifecycle. `Converged`, `Exhausted` and `Escalated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerState {
    Running { pass_index: u32 },
    Clean { consecutive_clean: u32 },
    Converged,
    Exhausted,
    Escalated,
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::Converged | ControllerState::Exhausted | ControllerState::Escalated
        )
    }

    /// Move to `to`. Leaving a terminal state is an error.
    pub fn transition(self, to: ControllerState) -> ControllerResult<ControllerState> {
        if self.is_terminal() {
            return Err(ConvergenceError::InvalidStateTransition { from: self, to });
        }
        Ok(to)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Running { pass_index } => write!(f, "running(pass {pass_index})"),
            ControllerState::Clean { consecutive_clean } => write!(f, "clean({consecutive_clean})"),
            ControllerState::Converged => write!(f, "converged"),
            ControllerState::Exhausted => write!(f, "exhausted"),
            ControllerState::Escalated => write!(f, "escalated"),
        }
    }
}

/// Where an issue the run has not closed stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Reported and not fixed.
    Unresolved,
    /// Reported fixed by the pipeline, not yet confirmed by a clean pass.
    FixedUnverified,
    /// Pivoted by the loop guard and handed to the caller.
    Escalated,
    /// Pivoted by the loop guard and accepted as technical debt.
    AcceptedDebt,
}

impl From<PivotAction> for IssueStatus {
    fn from(action: PivotAction) -> Self {
        match action {
            PivotAction::Escalate => IssueStatus::Escalated,
            PivotAction::AcceptAsDebt => IssueStatus::AcceptedDebt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingIssue {
    pub issue: Issue,
    pub status: IssueStatus,
}

/// What the fix pipeline did during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSummary {
    /// Issues sent to the pipeline (pivoted issues are never sent).
    pub sent: usize,
    pub fixed: Vec<IssueId>,
    pub unresolved: Vec<IssueId>,
    pub regressions: Vec<IssueId>,
    pub pivoted: Vec<IssueId>,
    /// Learning store records passed along as hints.
    pub hints: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only record of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    /// 1-based.
    pub index: u32,
    pub methodology: String,
    pub reviewer_profile: String,
    /// The methodology's own verdict, recorded but never trusted.
    pub self_reported_clean: bool,
    /// The oracle's verdict.
    pub clean: bool,
    pub issues: Vec<Issue>,
    pub consecutive_clean_after: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sub-checks dispatched through the parallel coordinator; zero for a direct call.
    #[serde(default)]
    pub sub_checks: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Working memory owned by exactly one run.
#[derive(Debug, Clone)]
pub struct ConvergenceState {
    required_clean_passes: u32,
    passes: Vec<PassRecord>,
    consecutive_clean: u32,
    streak: BTreeSet<String>,
    outstanding: Vec<OutstandingIssue>,
    total_issues_fixed: usize,
    retired: HashSet<IssueId>,
    /// Retired reported id -> identity of its live recurrence.
    recurrences: HashMap<IssueId, IssueId>,
    guard: LoopGuard,
}

impl ConvergenceState {
    pub fn new(required_clean_passes: u32, fix_attempt_limit: u32) -> Self {
        Self {
            required_clean_passes,
            passes: Vec::new(),
            consecutive_clean: 0,
            streak: BTreeSet::new(),
            outstanding: Vec::new(),
            total_issues_fixed: 0,
            retired: HashSet::new(),
            recurrences: HashMap::new(),
            guard: LoopGuard::new(fix_attempt_limit),
        }
    }

    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    pub fn pass_count(&self) -> u32 {
        self.passes.len() as u32
    }

    pub fn consecutive_clean(&self) -> u32 {
        self.consecutive_clean
    }

    pub fn is_converged(&self) -> bool {
        self.consecutive_clean >= self.required_clean_passes
    }

    /// Methodology names used in the current clean streak.
    pub fn streak(&self) -> &BTreeSet<String> {
        &self.streak
    }

    pub fn outstanding(&self) -> &[OutstandingIssue] {
        &self.outstanding
    }

    pub fn total_issues_fixed(&self) -> usize {
        self.total_issues_fixed
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut LoopGuard {
        &mut self.guard
    }

    pub fn push_pass(&mut self, record: PassRecord) {
        self.passes.push(record);
    }

    /// A clean pass by `methodology`: extend the streak and treat every
    /// unresolved or fixed-but-unverified issue as verified.
    pub fn record_clean(&mut self, methodology: &str) {
        self.consecutive_clean = (self.consecutive_clean + 1).min(self.required_clean_passes);
        self.streak.insert(methodology.to_string());
        self.outstanding.retain(|o| {
            matches!(o.status, IssueStatus::Escalated | IssueStatus::AcceptedDebt)
        });
    }

    /// A non-clean pass: the streak starts over.
    pub fn reset_streak(&mut self) {
        self.consecutive_clean = 0;
        self.streak.clear();
    }

    /// Every methodology has been used in the current streak; allow reuse.
    pub fn recycle_pool(&mut self) {
        self.streak.clear();
    }

    pub fn is_retired(&self, id: &IssueId) -> bool {
        self.retired.contains(id)
    }

    /// Retire a fixed identity and count it. Returns false if already retired.
    pub fn retire(&mut self, id: &IssueId) -> bool {
        if !self.retired.insert(id.clone()) {
            return false;
        }
        self.total_issues_fixed += 1;
        self.guard.record_resolved(id);
        self.set_status(id, IssueStatus::FixedUnverified);
        true
    }

    /// Map reported issues whose identity was retired onto their recurrence.
    ///
    /// A recurrence keeps its identity, and so its loop-guard counter, until
    /// it is retired itself; only then does the next report get a new one.
    pub fn reidentify(&mut self, issues: Vec<Issue>) -> Vec<Issue> {
        issues
            .into_iter()
            .map(|issue| self.current_identity(issue))
            .collect()
    }

    fn current_identity(&mut self, issue: Issue) -> Issue {
        if !self.is_retired(&issue.id) {
            return issue;
        }
        let live = self
            .recurrences
            .get(&issue.id)
            .filter(|id| !self.retired.contains(*id))
            .cloned();
        match live {
            Some(id) => Issue {
                id,
                related_to: Some(issue.id.clone()),
                ..issue
            },
            None => {
                let recurrence = issue.as_recurrence();
                self.recurrences.insert(issue.id, recurrence.id.clone());
                recurrence
            }
        }
    }

    /// Pivoted with [`PivotAction::AcceptAsDebt`].
    pub fn is_accepted_debt(&self, id: &IssueId) -> bool {
        self.guard.pivot_action(id) == Some(PivotAction::AcceptAsDebt)
    }

    /// Record `issues` as outstanding. Pivoted issues keep their pivot status.
    pub fn mark_outstanding(&mut self, issues: &[Issue]) {
        for issue in issues {
            let status = match self.guard.pivot_action(&issue.id) {
                Some(action) => IssueStatus::from(action),
                None => IssueStatus::Unresolved,
            };
            match self.outstanding.iter_mut().find(|o| o.issue.id == issue.id) {
                Some(existing) => {
                    existing.issue = issue.clone();
                    existing.status = status;
                }
                None => self.outstanding.push(OutstandingIssue {
                    issue: issue.clone(),
                    status,
                }),
            }
        }
    }

    pub fn set_status(&mut self, id: &IssueId, status: IssueStatus) {
        if let Some(existing) = self.outstanding.iter_mut().find(|o| &o.issue.id == id) {
            existing.status = status;
        }
    }

    pub fn into_parts(self) -> (Vec<PassRecord>, Vec<OutstandingIssue>, usize) {
        (self.passes, self.outstanding, self.total_issues_fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn issue(id: &str) -> Issue {
        Issue::new(id, Severity::Medium, "lint", "src/lib.rs", "warning")
    }

    #[test]
    fn test_terminal_state_cannot_be_left() {
        let state = ControllerState::Converged;
        let err = state
            .transition(ControllerState::Running { pass_index: 4 })
            .unwrap_err();
        assert!(matches!(err, ConvergenceError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_running_to_clean_to_converged() {
        let state = ControllerState::Running { pass_index: 1 };
        let state = state
            .transition(ControllerState::Clean { consecutive_clean: 1 })
            .unwrap();
        let state = state.transition(ControllerState::Converged).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_clean_streak_caps_at_threshold() {
        let mut state = ConvergenceState::new(2, 3);
        state.record_clean("a");
        state.record_clean("b");
        state.record_clean("c");
        assert_eq!(state.consecutive_clean(), 2);
        assert!(state.is_converged());
    }

    #[test]
    fn test_reset_clears_streak_set() {
        let mut state = ConvergenceState::new(3, 3);
        state.record_clean("a");
        state.reset_streak();
        assert_eq!(state.consecutive_clean(), 0);
        assert!(state.streak().is_empty());
    }

    #[test]
    fn test_retired_ids_are_reidentified() {
        let mut state = ConvergenceState::new(3, 3);
        state.mark_outstanding(&[issue("i-1")]);
        assert!(state.retire(&IssueId::from("i-1")));
        assert!(!state.retire(&IssueId::from("i-1")));
        assert_eq!(state.total_issues_fixed(), 1);
        assert_eq!(state.outstanding()[0].status, IssueStatus::FixedUnverified);

        let reported = state.reidentify(vec![issue("i-1"), issue("i-2")]);
        assert_ne!(reported[0].id, IssueId::from("i-1"));
        assert_eq!(reported[0].related_to, Some(IssueId::from("i-1")));
        assert_eq!(reported[1].id, IssueId::from("i-2"));
    }

    #[test]
    fn test_recurrence_identity_is_stable_until_retired() {
        let mut state = ConvergenceState::new(3, 3);
        state.retire(&IssueId::from("i-1"));

        let first = state.reidentify(vec![issue("i-1")]).remove(0).id;
        let second = state.reidentify(vec![issue("i-1")]).remove(0).id;
        assert_eq!(first, second);

        state.retire(&first);
        let third = state.reidentify(vec![issue("i-1")]).remove(0);
        assert_ne!(third.id, first);
        assert_eq!(third.related_to, Some(IssueId::from("i-1")));
    }

    #[test]
    fn test_accepted_debt_is_distinguished_from_escalation() {
        let mut state = ConvergenceState::new(3, 3);
        state.guard_mut().mark_pivoted(&IssueId::from("d"), PivotAction::AcceptAsDebt);
        state.guard_mut().mark_pivoted(&IssueId::from("e"), PivotAction::Escalate);
        assert!(state.is_accepted_debt(&IssueId::from("d")));
        assert!(!state.is_accepted_debt(&IssueId::from("e")));
        assert!(!state.is_accepted_debt(&IssueId::from("x")));
    }

    #[test]
    fn test_clean_pass_keeps_only_pivoted_outstanding() {
        let mut state = ConvergenceState::new(3, 3);
        state.guard_mut().mark_pivoted(&IssueId::from("p"), PivotAction::AcceptAsDebt);
        state.mark_outstanding(&[issue("u"), issue("p")]);

        state.record_clean("a");

        assert_eq!(state.outstanding().len(), 1);
        assert_eq!(state.outstanding()[0].status, IssueStatus::AcceptedDebt);
    }
}
