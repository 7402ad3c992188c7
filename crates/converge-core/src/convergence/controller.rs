//! The convergence run driver.
//!
//! One run repeatedly picks an unused methodology, verifies the subject,
//! asks the oracle whether the pass was clean and, when it was not, sends the
//! open issues through the fix pipeline. The run converges after
//! `required_clean_passes` consecutive clean passes by distinct methodologies,
//! and always terminates within `max_iterations` passes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::domain::{
    Issue, IssueId, Methodology, MethodologyError, PassContext, PassResult, SubCheck, Subject,
    ISSUE_HISTORY_KEY, SUBJECT_ID_KEY,
};
use crate::fix::{FixError, FixExecutor};
use crate::learning::{LearningStore, ObservedOutcome, PatternKind, PatternRecord};
use crate::loop_guard::{IssueEscalation, PivotAction};
use crate::metrics::METRICS;
use crate::obs;
use crate::parallel::{
    retry_with_backoff, BatchConfig, CoordinatorError, Operation, ParallelCoordinator, TaskError,
    TaskOutput,
};
use crate::registry::{MethodologyRegistry, RegistryError};

use super::error::{ConvergenceError, ControllerResult};
use super::oracle::{CleanlinessOracle, IssueFreeOracle};
use super::policy::ConvergencePolicy;
use super::result::{ConvergenceResult, RunSummary, TerminationReason};
use super::selector::{MethodologySelector, RandomSelector};
use super::state::{ControllerState, ConvergenceState, FixSummary, PassRecord};

/// Drives subjects toward a stable clean state.
///
/// The controller holds only its collaborators; all run state lives in a
/// per-run [`ConvergenceState`], so one controller can drive several runs
/// concurrently.
pub struct ConvergenceController {
    fixer: Arc<dyn FixExecutor>,
    oracle: Arc<dyn CleanlinessOracle>,
    learning: Option<Arc<dyn LearningStore>>,
    selector: Arc<dyn MethodologySelector>,
    coordinator: ParallelCoordinator,
}

impl ConvergenceController {
    pub fn new(fixer: Arc<dyn FixExecutor>) -> Self {
        Self {
            fixer,
            oracle: Arc::new(IssueFreeOracle),
            learning: None,
            selector: Arc::new(RandomSelector::new()),
            coordinator: ParallelCoordinator::default(),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn CleanlinessOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_learning_store(mut self, store: Arc<dyn LearningStore>) -> Self {
        self.learning = Some(store);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn MethodologySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Batch controls used when a methodology fans out into sub-checks.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.coordinator = ParallelCoordinator::new(config);
        self
    }

    /// Run convergence for `subject` over `pool`.
    ///
    /// Returns `Err` only for an invalid policy or an empty pool. Every other
    /// ending, including exhaustion, escalation and cancellation, is described
    /// by the returned [`ConvergenceResult`].
    pub async fn run(
        &self,
        subject: &Subject,
        pool: &MethodologyRegistry,
        policy: &ConvergencePolicy,
        cancel: &CancellationToken,
    ) -> ControllerResult<ConvergenceResult> {
        policy.validate()?;
        if pool.is_empty() {
            return Err(RegistryError::PoolExhausted { pool_size: 0 }.into());
        }

        let run_id = format!("run-{}", Uuid::new_v4());
        let span = obs::run_span(&run_id, &subject.id);
        self.drive(run_id, subject, pool, policy, cancel)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        run_id: String,
        subject: &Subject,
        pool: &MethodologyRegistry,
        policy: &ConvergencePolicy,
        cancel: &CancellationToken,
    ) -> ControllerResult<ConvergenceResult> {
        let started_at = Utc::now();
        let clock = Instant::now();

        if (pool.len() as u32) < policy.required_clean_passes {
            warn!(
                pool_size = pool.len(),
                required_clean_passes = policy.required_clean_passes,
                "pool smaller than the clean streak, methodologies will repeat within a streak"
            );
        }
        obs::emit_run_started(&run_id, &subject.id, pool.len(), policy.required_clean_passes);

        let mut run = Run::new(self, run_id, subject, policy, cancel);
        let mut controller_state = ControllerState::Running { pass_index: 1 };

        while !run.state.is_converged() && run.state.pass_count() < policy.max_iterations {
            if cancel.is_cancelled() {
                run.halt(TerminationReason::Cancelled, "run cancelled");
                break;
            }
            let pass_index = run.state.pass_count() + 1;
            controller_state = controller_state.transition(ControllerState::Running { pass_index })?;

            if run.pass(pass_index, pool).await? {
                controller_state = controller_state.transition(ControllerState::Clean {
                    consecutive_clean: run.state.consecutive_clean(),
                })?;
            }
            if run.halted.is_some() {
                break;
            }
        }

        let (reason, escalation_reason) = match run.halted.take() {
            Some((reason, message)) => (reason, Some(message)),
            None if run.state.is_converged() => (TerminationReason::Converged, None),
            None => (TerminationReason::Exhausted, None),
        };
        let final_state = controller_state.transition(reason.terminal_state())?;

        let Run {
            run_id,
            state,
            escalations,
            ..
        } = run;
        let (passes, outstanding_issues, total_issues_fixed) = state.into_parts();
        let summary = RunSummary::build(
            reason,
            &passes,
            &outstanding_issues,
            total_issues_fixed,
            escalations.len(),
        );

        obs::emit_run_terminated(
            &run_id,
            &reason.to_string(),
            passes.len(),
            total_issues_fixed,
            clock.elapsed().as_millis() as u64,
        );
        METRICS.flush();

        Ok(ConvergenceResult {
            run_id,
            subject_id: subject.id.clone(),
            converged: reason == TerminationReason::Converged,
            state: final_state,
            termination_reason: reason,
            escalation_reason,
            passes,
            total_issues_fixed,
            outstanding_issues,
            escalations,
            summary,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

enum Invocation {
    Completed { result: PassResult, sub_checks: usize },
    Errored { error: String, sub_checks: usize },
    Cancelled,
}

/// Mutable state of one run plus borrowed collaborators.
struct Run<'a> {
    controller: &'a ConvergenceController,
    run_id: String,
    subject: &'a Subject,
    policy: &'a ConvergencePolicy,
    cancel: &'a CancellationToken,
    state: ConvergenceState,
    context: PassContext,
    escalations: Vec<IssueEscalation>,
    halted: Option<(TerminationReason, String)>,
}

impl<'a> Run<'a> {
    fn new(
        controller: &'a ConvergenceController,
        run_id: String,
        subject: &'a Subject,
        policy: &'a ConvergencePolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        let mut context = PassContext::new();
        context.insert(SUBJECT_ID_KEY, json!(subject.id));
        Self {
            controller,
            run_id,
            subject,
            policy,
            cancel,
            state: ConvergenceState::new(
                policy.required_clean_passes,
                policy.per_issue_fix_attempt_limit,
            ),
            context,
            escalations: Vec::new(),
            halted: None,
        }
    }

    fn halt(&mut self, reason: TerminationReason, message: impl Into<String>) {
        if self.halted.is_none() {
            let message = message.into();
            warn!(reason = %reason, message = %message, "run escalated");
            self.halted = Some((reason, message));
        }
    }

    /// Execute one pass. Returns the oracle's verdict.
    async fn pass(&mut self, pass_index: u32, pool: &MethodologyRegistry) -> ControllerResult<bool> {
        let candidates = match pool.select_unused(self.state.streak()) {
            Ok(candidates) => candidates,
            Err(RegistryError::PoolExhausted { pool_size }) => {
                info!(pass_index, pool_size, "every methodology used in this streak, pool recycled");
                self.state.recycle_pool();
                pool.select_unused(self.state.streak())?
            }
            Err(e) => return Err(e.into()),
        };
        let choice = self.controller.selector.select(&candidates);
        let methodology = candidates[choice.min(candidates.len() - 1)];

        if self.policy.clear_context_between_passes && pass_index > 1 {
            let removed = self.context.retain_only(&self.policy.preserved_context_keys);
            debug!(pass_index, removed, "pass context cleared");
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let cancel = self.cancel;
        let invocation = tokio::select! {
            biased;
            _ = cancel.cancelled() => Invocation::Cancelled,
            invocation = self.invoke(methodology) => invocation,
        };

        let (result, error, sub_checks) = match invocation {
            Invocation::Cancelled => {
                self.halt(TerminationReason::Cancelled, "run cancelled");
                return Ok(false);
            }
            Invocation::Completed { result, sub_checks } => (Some(result), None, sub_checks),
            Invocation::Errored { error, sub_checks } => {
                warn!(pass_index, methodology = methodology.name(), error = %error, "pass errored");
                (None, Some(error), sub_checks)
            }
        };

        let (self_reported_clean, clean, issues) = match result {
            Some(mut result) => {
                let reported = self.state.reidentify(std::mem::take(&mut result.issues));
                // Accepted debt stays on the record but does not block cleanliness.
                result.issues = reported
                    .iter()
                    .filter(|i| !self.state.is_accepted_debt(&i.id))
                    .cloned()
                    .collect();
                let clean = self.controller.oracle.is_clean(self.subject, &result).await;
                (result.clean, clean, reported)
            }
            None => (false, false, Vec::new()),
        };

        let fix = if clean {
            self.state.record_clean(methodology.name());
            METRICS.inc_clean_passes();
            None
        } else {
            self.state.reset_streak();
            if issues.is_empty() {
                None
            } else {
                self.state.mark_outstanding(&issues);
                Some(self.fix_cycle(pass_index, methodology.name(), &issues).await)
            }
        };
        self.record_issue_history(pass_index, &issues);

        let record = PassRecord {
            index: pass_index,
            methodology: methodology.name().to_string(),
            reviewer_profile: methodology.profile().name.clone(),
            self_reported_clean,
            clean,
            issues,
            consecutive_clean_after: self.state.consecutive_clean(),
            fix,
            error,
            sub_checks,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        };

        METRICS.inc_passes();
        obs::emit_pass_completed(
            &self.run_id,
            pass_index,
            &record.methodology,
            clean,
            record.issues.len(),
            record.consecutive_clean_after,
        );
        self.state.push_pass(record);
        Ok(clean)
    }

    async fn invoke(&mut self, methodology: &Methodology) -> Invocation {
        let executor = methodology.executor();
        let checks = executor.sub_checks(self.subject, methodology.profile());

        if checks.is_empty() {
            return match executor
                .verify(self.subject, &mut self.context, methodology.profile())
                .await
            {
                Ok(result) => Invocation::Completed {
                    result,
                    sub_checks: 0,
                },
                Err(source) => Invocation::Errored {
                    error: methodology_error(methodology, source),
                    sub_checks: 0,
                },
            };
        }

        let count = checks.len();
        let timeout = self.policy.sub_check_timeout();
        let operations: Vec<Operation> = checks
            .into_iter()
            .enumerate()
            .map(|(index, check)| sub_check_operation(index, check, timeout))
            .collect();

        match self.controller.coordinator.run(operations, self.cancel).await {
            Ok(report) if report.is_fully_successful() => {
                let parts: Result<Vec<PassResult>, _> = report
                    .successes()
                    .map(|(_, output)| serde_json::from_value::<PassResult>(output.value.clone()))
                    .collect();
                match parts {
                    Ok(parts) => Invocation::Completed {
                        result: PassResult::merge(parts),
                        sub_checks: count,
                    },
                    Err(e) => Invocation::Errored {
                        error: format!("malformed sub-check result: {e}"),
                        sub_checks: count,
                    },
                }
            }
            Ok(report) => Invocation::Errored {
                error: format!(
                    "{} of {} sub-checks did not complete: {}",
                    report.total - report.succeeded,
                    report.total,
                    report.warnings.join("; ")
                ),
                sub_checks: count,
            },
            Err(CoordinatorError::Cancelled { .. }) => Invocation::Cancelled,
            Err(e) => Invocation::Errored {
                error: e.to_string(),
                sub_checks: count,
            },
        }
    }

    /// Send the open issues of a non-clean pass through the fix pipeline once.
    async fn fix_cycle(&mut self, pass_index: u32, methodology: &str, issues: &[Issue]) -> FixSummary {
        let to_send: Vec<Issue> = issues
            .iter()
            .filter(|i| !self.state.guard().is_pivoted(&i.id))
            .cloned()
            .collect();
        let mut summary = FixSummary {
            sent: to_send.len(),
            ..FixSummary::default()
        };
        if to_send.is_empty() {
            debug!(pass_index, "every reported issue already pivoted, nothing to fix");
            return summary;
        }

        for issue in &to_send {
            self.state.guard_mut().record_attempt(&issue.id);
        }

        let categories: Vec<String> = to_send
            .iter()
            .map(|i| i.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let hints = self.find_hints(&categories).await;
        summary.hints = hints.len();

        let controller = self.controller;
        let subject = self.subject;
        let sent = &to_send;
        let hint_refs = &hints;
        let timeout = self.policy.fix_timeout();
        let timeout_ms = self.policy.fix_timeout_ms;
        let attempt = retry_with_backoff(
            self.policy.fix_retry_attempts,
            self.policy.backoff_unit(),
            move |_| async move {
                match tokio::time::timeout(timeout, controller.fixer.fix(subject, sent, hint_refs)).await {
                    Ok(result) => result,
                    Err(_) => Err(FixError::Timeout { timeout_ms }),
                }
            },
        );

        let cancel = self.cancel;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = attempt => Some(outcome),
        };
        let outcome = match outcome {
            None => {
                self.halt(TerminationReason::Cancelled, "run cancelled during fix");
                summary.unresolved = to_send.iter().map(|i| i.id.clone()).collect();
                return summary;
            }
            Some(Err(err)) => {
                summary.error = Some(err.to_string());
                summary.unresolved = to_send.iter().map(|i| i.id.clone()).collect();
                self.halt(
                    TerminationReason::FixPipelineFailed,
                    format!(
                        "fix pipeline failed after {} attempts: {err}",
                        self.policy.fix_retry_attempts
                    ),
                );
                return summary;
            }
            Some(Ok(outcome)) => outcome,
        };

        let sent_ids: HashSet<&IssueId> = to_send.iter().map(|i| &i.id).collect();
        let mut fixed = HashSet::new();
        for id in &outcome.fixed {
            if !sent_ids.contains(id) {
                warn!(issue_id = %id, "fix pipeline reported an issue it was not sent");
                continue;
            }
            if self.state.retire(id) {
                summary.fixed.push(id.clone());
                fixed.insert(id.clone());
            }
        }

        for issue in &to_send {
            if fixed.contains(&issue.id) {
                continue;
            }
            summary.unresolved.push(issue.id.clone());
            if self.state.guard().should_pivot(&issue.id) {
                self.pivot(pass_index, issue);
                summary.pivoted.push(issue.id.clone());
            }
        }

        let regressions = self.state.reidentify(outcome.regressions);
        summary.regressions = regressions.iter().map(|r| r.id.clone()).collect();
        self.state.mark_outstanding(&regressions);

        debug!(
            pass_index,
            sent = summary.sent,
            fixed = summary.fixed.len(),
            regressions = summary.regressions.len(),
            pivoted = summary.pivoted.len(),
            "fix cycle finished"
        );

        self.record_learning(methodology, &to_send, &fixed, &hints).await;
        summary
    }

    fn pivot(&mut self, pass_index: u32, issue: &Issue) {
        let action = self.policy.pivot_action;
        let attempts = self.state.guard().attempts(&issue.id);
        self.state.guard_mut().mark_pivoted(&issue.id, action);
        self.state.set_status(&issue.id, action.into());

        METRICS.inc_pivots();
        obs::emit_loop_guard_pivot(&self.run_id, issue.id.as_str(), attempts, &action.to_string());

        let escalation = IssueEscalation {
            issue: issue.clone(),
            attempts,
            action,
            pass_index,
        };
        if self.policy.halt_on_escalation && action == PivotAction::Escalate {
            self.halt(TerminationReason::LoopGuardPivot, escalation.reason());
        }
        self.escalations.push(escalation);
    }

    async fn find_hints(&self, categories: &[String]) -> Vec<PatternRecord> {
        let Some(store) = &self.controller.learning else {
            return Vec::new();
        };
        store.find_relevant(categories).await.unwrap_or_else(|e| {
            obs::emit_learning_error(&self.run_id, &e);
            Vec::new()
        })
    }

    /// Record one antipattern observation per issue category, and feed the
    /// outcome back into the patterns used as hints (or create one when a
    /// category was fixed without any).
    async fn record_learning(
        &self,
        methodology: &str,
        sent: &[Issue],
        fixed: &HashSet<IssueId>,
        hints: &[PatternRecord],
    ) {
        let Some(store) = &self.controller.learning else {
            return;
        };

        let mut by_category: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
        for issue in sent {
            by_category.entry(issue.category.as_str()).or_default().push(issue);
        }

        for (category, issues) in by_category {
            let all_fixed = issues.iter().all(|i| fixed.contains(&i.id));
            let resolution = if all_fixed {
                "resolved by the fix pipeline"
            } else {
                "not resolved by the fix pipeline"
            };

            let mut outcomes = vec![ObservedOutcome::new(PatternKind::Antipattern, category, all_fixed)
                .with_context(format!("reported by {methodology}"))
                .with_problem(issues[0].description.clone())
                .with_resolution(resolution)];

            let known: Vec<&PatternRecord> = hints
                .iter()
                .filter(|h| h.kind == PatternKind::Pattern && h.domain_tags.contains(category))
                .collect();
            if known.is_empty() {
                if all_fixed {
                    outcomes.push(
                        ObservedOutcome::new(PatternKind::Pattern, format!("fix:{category}"), true)
                            .with_context(format!("reported by {methodology}"))
                            .with_problem(issues[0].description.clone())
                            .with_resolution(resolution),
                    );
                }
            } else {
                for hint in known {
                    let mut outcome = ObservedOutcome::new(PatternKind::Pattern, hint.name.clone(), all_fixed);
                    outcome.tags = hint.domain_tags.clone();
                    outcomes.push(outcome);
                }
            }

            for outcome in outcomes {
                if let Err(e) = store.record_outcome(category, outcome).await {
                    obs::emit_learning_error(&self.run_id, &e);
                }
            }
        }
    }

    fn record_issue_history(&mut self, pass_index: u32, issues: &[Issue]) {
        if issues.is_empty() {
            return;
        }
        let mut history = match self.context.remove(ISSUE_HISTORY_KEY) {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        let ids: Vec<&str> = issues.iter().map(|i| i.id.as_str()).collect();
        history.push(json!({ "pass": pass_index, "issues": ids }));
        self.context.insert(ISSUE_HISTORY_KEY, Value::Array(history));
    }
}

fn methodology_error(methodology: &Methodology, source: MethodologyError) -> String {
    ConvergenceError::Methodology {
        name: methodology.name().to_string(),
        source,
    }
    .to_string()
}

/// Wrap a sub-check as a coordinator operation whose output carries the
/// serialized [`PassResult`]. Ids are index-prefixed so task id order is
/// declaration order.
fn sub_check_operation(index: usize, check: SubCheck, timeout: Duration) -> Operation {
    let id = format!("{index:04}-{}", check.name);
    Operation::new(id, move || {
        let check = check.clone();
        async move {
            let result = check
                .execute()
                .await
                .map_err(|e| TaskError::failed(e.to_string()))?;
            let value = serde_json::to_value(&result).map_err(|e| TaskError::failed(e.to_string()))?;
            Ok::<_, TaskError>(TaskOutput::new(value))
        }
    })
    .with_timeout(timeout)
}
