//! End-to-end convergence runs over scripted methodologies and fixers.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use converge_core::convergence::{
    ControllerState, ConvergenceController, ConvergenceError, ConvergencePolicy, IssueStatus,
    MethodologySelector, TerminationReason,
};
use converge_core::domain::{
    Issue, IssueId, Methodology, MethodologyResult, PassContext, PassResult, ReviewerProfile,
    Severity, SubCheck, Subject, VerificationExecutor,
};
use converge_core::fix::{FixExecutor, FixOutcome, FixResult, NoopFixer};
use converge_core::learning::{LearningStore, MemoryLearningStore, PatternKind, PatternRecord};
use converge_core::loop_guard::PivotAction;
use converge_core::registry::MethodologyRegistry;

/// Returns the scripted issue lists in order, then clean passes forever.
struct Scripted {
    script: Mutex<VecDeque<Vec<Issue>>>,
}

impl Scripted {
    fn new(script: Vec<Vec<Issue>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }

    fn clean() -> Arc<Self> {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl VerificationExecutor for Scripted {
    async fn verify(
        &self,
        _subject: &Subject,
        _context: &mut PassContext,
        _profile: &ReviewerProfile,
    ) -> MethodologyResult<PassResult> {
        let issues = self.script.lock().unwrap().pop_front().unwrap_or_default();
        Ok(PassResult::from_issues(issues, Value::Null))
    }
}

/// Always reports the same issue.
struct Stubborn;

#[async_trait]
impl VerificationExecutor for Stubborn {
    async fn verify(
        &self,
        _subject: &Subject,
        _context: &mut PassContext,
        _profile: &ReviewerProfile,
    ) -> MethodologyResult<PassResult> {
        Ok(PassResult::from_issues(
            vec![issue("flaky-1", "flaky-test")],
            Value::Null,
        ))
    }
}

/// Resolves everything it is sent, optionally introducing regressions once.
#[derive(Default)]
struct FixAll {
    calls: AtomicUsize,
    regressions: Mutex<Vec<Issue>>,
    hints_seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl FixExecutor for FixAll {
    async fn fix(
        &self,
        _subject: &Subject,
        issues: &[Issue],
        hints: &[PatternRecord],
    ) -> FixResult<FixOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hints_seen.lock().unwrap().push(hints.len());
        Ok(FixOutcome {
            fixed: issues.iter().map(|i| i.id.clone()).collect(),
            unresolved: Vec::new(),
            regressions: std::mem::take(&mut *self.regressions.lock().unwrap()),
        })
    }
}

/// Picks methodologies by name in a fixed order.
struct ByName(Mutex<VecDeque<&'static str>>);

impl ByName {
    fn new(order: &[&'static str]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(order.iter().copied().collect())))
    }
}

impl MethodologySelector for ByName {
    fn select(&self, candidates: &[&Methodology]) -> usize {
        let next = self.0.lock().unwrap().pop_front();
        next.and_then(|name| candidates.iter().position(|m| m.name() == name))
            .unwrap_or(0)
    }
}

fn issue(id: &str, category: &str) -> Issue {
    Issue::new(id, Severity::Medium, category, "src/lib.rs", format!("{category} problem"))
}

fn subject() -> Subject {
    Subject::new("checkout-service", json!({"branch": "main"}))
}

fn registry(entries: Vec<(&str, Arc<dyn VerificationExecutor>)>) -> MethodologyRegistry {
    let mut registry = MethodologyRegistry::new();
    for (name, executor) in entries {
        registry.register(Methodology::new(name, executor)).unwrap();
    }
    registry
}

fn policy() -> ConvergencePolicy {
    ConvergencePolicy {
        backoff_unit_ms: 1,
        fix_timeout_ms: 5_000,
        ..ConvergencePolicy::default()
    }
}

fn scenario_pool() -> MethodologyRegistry {
    let a: Arc<dyn VerificationExecutor> = Scripted::new(vec![vec![issue("a-1", "lint")]]);
    let b: Arc<dyn VerificationExecutor> =
        Scripted::new(vec![vec![issue("b-1", "lint"), issue("b-2", "security")]]);
    let c: Arc<dyn VerificationExecutor> = Scripted::clean();
    registry(vec![("A", a), ("B", b), ("C", c)])
}

#[tokio::test]
async fn test_scripted_scenario_converges_after_five_passes() {
    let fixer = Arc::new(FixAll::default());
    let controller = ConvergenceController::new(fixer.clone())
        .with_selector(ByName::new(&["B", "A", "C", "A", "B"]));

    let result = controller
        .run(&subject(), &scenario_pool(), &policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.state, ControllerState::Converged);
    assert_eq!(result.termination_reason, TerminationReason::Converged);
    assert_eq!(result.passes.len(), 5);
    assert_eq!(result.total_issues_fixed, 3);
    assert!(result.outstanding_issues.is_empty());

    let order: Vec<&str> = result.passes.iter().map(|p| p.methodology.as_str()).collect();
    assert_eq!(order, vec!["B", "A", "C", "A", "B"]);
    let streaks: Vec<u32> = result.passes.iter().map(|p| p.consecutive_clean_after).collect();
    assert_eq!(streaks, vec![0, 0, 1, 2, 3]);

    let indices: Vec<u32> = result.passes.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert_eq!(fixer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.summary.clean_passes, 3);
    assert!(result.into_result().is_ok());
}

#[tokio::test]
async fn test_always_clean_converges_with_distinct_methodologies() {
    let pool = registry(vec![
        ("static", Scripted::clean() as Arc<dyn VerificationExecutor>),
        ("property", Scripted::clean() as Arc<dyn VerificationExecutor>),
        ("review", Scripted::clean() as Arc<dyn VerificationExecutor>),
        ("fuzz", Scripted::clean() as Arc<dyn VerificationExecutor>),
    ]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));

    let result = controller
        .run(&subject(), &pool, &policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.passes.len(), 3);
    let distinct: BTreeSet<&str> = result.passes.iter().map(|p| p.methodology.as_str()).collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(result.total_issues_fixed, 0);
}

#[tokio::test]
async fn test_pool_smaller_than_streak_recycles() {
    let pool = registry(vec![("only", Scripted::clean() as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));
    let policy = ConvergencePolicy {
        required_clean_passes: 2,
        ..policy()
    };

    let result = controller
        .run(&subject(), &pool, &policy, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.passes.len(), 2);
    assert!(result.passes.iter().all(|p| p.methodology == "only"));
}

#[tokio::test]
async fn test_unresolvable_issue_pivots_and_run_exhausts() {
    let pool = registry(vec![("stubborn", Arc::new(Stubborn) as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));
    let policy = ConvergencePolicy {
        max_iterations: 5,
        ..policy()
    };

    let result = controller
        .run(&subject(), &pool, &policy, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination_reason, TerminationReason::Exhausted);
    assert_eq!(result.state, ControllerState::Exhausted);
    assert_eq!(result.passes.len(), 5);

    assert_eq!(result.escalations.len(), 1);
    let escalation = &result.escalations[0];
    assert_eq!(escalation.issue.id, IssueId::from("flaky-1"));
    assert_eq!(escalation.attempts, 3);
    assert_eq!(escalation.pass_index, 3);

    // After the pivot the issue is no longer sent to the fixer.
    let sent: Vec<usize> = result
        .passes
        .iter()
        .map(|p| p.fix.as_ref().map(|f| f.sent).unwrap_or(0))
        .collect();
    assert_eq!(sent, vec![1, 1, 1, 0, 0]);

    assert_eq!(result.outstanding_issues.len(), 1);
    assert_eq!(result.outstanding_issues[0].status, IssueStatus::Escalated);

    match result.into_result() {
        Err(ConvergenceError::ConvergenceExhausted { passes, outstanding }) => {
            assert_eq!(passes, 5);
            assert_eq!(outstanding, 1);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_halt_on_escalation_stops_at_pivot() {
    let pool = registry(vec![("stubborn", Arc::new(Stubborn) as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));
    let policy = ConvergencePolicy {
        halt_on_escalation: true,
        ..policy()
    };

    let result = controller
        .run(&subject(), &pool, &policy, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination_reason, TerminationReason::LoopGuardPivot);
    assert_eq!(result.state, ControllerState::Escalated);
    assert_eq!(result.passes.len(), 3);
    assert!(result.escalation_reason.as_deref().unwrap().contains("flaky-1"));

    match result.into_result() {
        Err(ConvergenceError::LoopGuardPivot { issue_id, attempts }) => {
            assert_eq!(issue_id, IssueId::from("flaky-1"));
            assert_eq!(attempts, 3);
        }
        other => panic!("expected loop guard pivot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_accepted_debt_no_longer_blocks_convergence() {
    let pool = registry(vec![("stubborn", Arc::new(Stubborn) as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));
    let policy = ConvergencePolicy {
        max_iterations: 8,
        pivot_action: PivotAction::AcceptAsDebt,
        halt_on_escalation: true,
        ..policy()
    };

    let result = controller
        .run(&subject(), &pool, &policy, &CancellationToken::new())
        .await
        .unwrap();

    // Accepting debt is not an escalation, so the run keeps going and the
    // passes after the pivot count as clean.
    assert!(result.converged);
    assert_eq!(result.termination_reason, TerminationReason::Converged);
    assert_eq!(result.passes.len(), 6);
    let clean: Vec<bool> = result.passes.iter().map(|p| p.clean).collect();
    assert_eq!(clean, vec![false, false, false, true, true, true]);

    // The debt stays on every pass record and in the outstanding list.
    assert!(result.passes.iter().all(|p| p.issues.len() == 1));
    assert_eq!(result.escalations.len(), 1);
    assert_eq!(result.escalations[0].action, PivotAction::AcceptAsDebt);
    assert_eq!(result.outstanding_issues.len(), 1);
    assert_eq!(result.outstanding_issues[0].status, IssueStatus::AcceptedDebt);
}

/// Claims to fix everything on its first call, then resolves nothing.
#[derive(Default)]
struct FixOnce {
    calls: AtomicUsize,
}

#[async_trait]
impl FixExecutor for FixOnce {
    async fn fix(
        &self,
        _subject: &Subject,
        issues: &[Issue],
        _hints: &[PatternRecord],
    ) -> FixResult<FixOutcome> {
        let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
        let (fixed, unresolved) = if first {
            (issues.iter().map(|i| i.id.clone()).collect(), Vec::new())
        } else {
            (Vec::new(), issues.to_vec())
        };
        Ok(FixOutcome {
            fixed,
            unresolved,
            regressions: Vec::new(),
        })
    }
}

#[tokio::test]
async fn test_recurring_issue_pivots_after_attempt_limit() {
    let pool = registry(vec![("stubborn", Arc::new(Stubborn) as Arc<dyn VerificationExecutor>)]);
    let fixer = Arc::new(FixOnce::default());
    let controller = ConvergenceController::new(fixer.clone());

    let result = controller
        .run(&subject(), &pool, &policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination_reason, TerminationReason::Exhausted);
    assert_eq!(result.passes.len(), 10);
    assert_eq!(result.total_issues_fixed, 1);

    // One fix for the original, three failed attempts on its recurrence.
    assert_eq!(fixer.calls.load(Ordering::SeqCst), 4);
    let sent: Vec<usize> = result
        .passes
        .iter()
        .map(|p| p.fix.as_ref().map(|f| f.sent).unwrap_or(0))
        .collect();
    assert_eq!(sent, vec![1, 1, 1, 1, 0, 0, 0, 0, 0, 0]);

    let recurrence_ids: BTreeSet<&IssueId> =
        result.passes[1..].iter().map(|p| &p.issues[0].id).collect();
    assert_eq!(recurrence_ids.len(), 1);

    assert_eq!(result.escalations.len(), 1);
    let escalation = &result.escalations[0];
    assert_eq!(escalation.attempts, 3);
    assert_eq!(escalation.pass_index, 4);
    assert_eq!(escalation.issue.related_to, Some(IssueId::from("flaky-1")));
    assert_ne!(escalation.issue.id, IssueId::from("flaky-1"));
}

#[tokio::test]
async fn test_self_reported_clean_is_not_trusted() {
    struct Overconfident;

    #[async_trait]
    impl VerificationExecutor for Overconfident {
        async fn verify(
            &self,
            _subject: &Subject,
            _context: &mut PassContext,
            _profile: &ReviewerProfile,
        ) -> MethodologyResult<PassResult> {
            Ok(PassResult::new(true, vec![issue("x-1", "docs")], Value::Null))
        }
    }

    let pool = registry(vec![("overconfident", Arc::new(Overconfident) as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));
    let policy = ConvergencePolicy {
        max_iterations: 2,
        ..policy()
    };

    let result = controller
        .run(&subject(), &pool, &policy, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert!(result.passes.iter().all(|p| p.self_reported_clean && !p.clean));
}

#[tokio::test]
async fn test_cancelled_before_first_pass() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let controller = ConvergenceController::new(Arc::new(NoopFixer));

    let result = controller
        .run(&subject(), &scenario_pool(), &policy(), &cancel)
        .await
        .unwrap();

    assert_eq!(result.termination_reason, TerminationReason::Cancelled);
    assert_eq!(result.state, ControllerState::Escalated);
    assert!(result.passes.is_empty());
    assert!(matches!(
        result.into_result(),
        Err(ConvergenceError::Cancelled { passes: 0 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_running_pass() {
    struct Slow;

    #[async_trait]
    impl VerificationExecutor for Slow {
        async fn verify(
            &self,
            _subject: &Subject,
            _context: &mut PassContext,
            _profile: &ReviewerProfile,
        ) -> MethodologyResult<PassResult> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(PassResult::clean_with(Value::Null))
        }
    }

    let pool = registry(vec![("slow", Arc::new(Slow) as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = controller
        .run(&subject(), &pool, &policy(), &cancel)
        .await
        .unwrap();

    assert_eq!(result.termination_reason, TerminationReason::Cancelled);
    assert!(result.passes.is_empty());
}

#[tokio::test]
async fn test_context_cleared_between_passes_keeps_preserved_keys() {
    /// Records what it found in the context, then leaves scratch data behind.
    #[derive(Default)]
    struct Snooper {
        seen: Mutex<Vec<(bool, Option<Value>)>>,
    }

    #[async_trait]
    impl VerificationExecutor for Snooper {
        async fn verify(
            &self,
            _subject: &Subject,
            context: &mut PassContext,
            _profile: &ReviewerProfile,
        ) -> MethodologyResult<PassResult> {
            self.seen.lock().unwrap().push((
                context.contains_key("scratch"),
                context.get("subject_id").cloned(),
            ));
            context.insert("scratch", json!("draft notes"));
            Ok(PassResult::clean_with(Value::Null))
        }
    }

    let snooper = Arc::new(Snooper::default());
    let pool = registry(vec![("snoop", snooper.clone() as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));
    let policy = ConvergencePolicy {
        clear_context_between_passes: true,
        ..policy()
    };

    let result = controller
        .run(&subject(), &pool, &policy, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.converged);

    let seen = snooper.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(scratch, _)| !scratch));
    assert!(seen
        .iter()
        .all(|(_, id)| id.as_ref() == Some(&json!("checkout-service"))));
}

#[tokio::test]
async fn test_context_kept_when_clearing_disabled() {
    #[derive(Default)]
    struct Counter {
        seen: Mutex<Vec<Option<Value>>>,
    }

    #[async_trait]
    impl VerificationExecutor for Counter {
        async fn verify(
            &self,
            _subject: &Subject,
            context: &mut PassContext,
            _profile: &ReviewerProfile,
        ) -> MethodologyResult<PassResult> {
            let previous = context.get("count").cloned();
            let next = previous.as_ref().and_then(Value::as_u64).unwrap_or(0) + 1;
            self.seen.lock().unwrap().push(previous);
            context.insert("count", json!(next));
            Ok(PassResult::clean_with(Value::Null))
        }
    }

    let counter = Arc::new(Counter::default());
    let pool = registry(vec![("count", counter.clone() as Arc<dyn VerificationExecutor>)]);
    let controller = ConvergenceController::new(Arc::new(NoopFixer));

    controller
        .run(&subject(), &pool, &policy(), &CancellationToken::new())
        .await
        .unwrap();

    let seen = counter.seen.lock().unwrap();
    assert_eq!(*seen, vec![None, Some(json!(1)), Some(json!(2))]);
}

#[tokio::test]
async fn test_sub_checks_are_merged_in_declaration_order() {
    struct Fanned {
        round: AtomicUsize,
    }

    #[async_trait]
    impl VerificationExecutor for Fanned {
        async fn verify(
            &self,
            _subject: &Subject,
            _context: &mut PassContext,
            _profile: &ReviewerProfile,
        ) -> MethodologyResult<PassResult> {
            unreachable!("sub-checks replace verify")
        }

        fn sub_checks(&self, _subject: &Subject, _profile: &ReviewerProfile) -> Vec<SubCheck> {
            let round = self.round.fetch_add(1, Ordering::SeqCst);
            let dirty = round == 0;
            vec![
                SubCheck::new("security", move || async move {
                    if dirty {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(PassResult::from_issues(vec![issue("sec-1", "security")], Value::Null))
                    } else {
                        Ok(PassResult::clean_with(Value::Null))
                    }
                }),
                SubCheck::new("style", move || async move {
                    if dirty {
                        Ok(PassResult::from_issues(vec![issue("sty-1", "style")], Value::Null))
                    } else {
                        Ok(PassResult::clean_with(Value::Null))
                    }
                }),
            ]
        }
    }

    let pool = registry(vec![(
        "fanned",
        Arc::new(Fanned {
            round: AtomicUsize::new(0),
        }) as Arc<dyn VerificationExecutor>,
    )]);
    let controller = ConvergenceController::new(Arc::new(FixAll::default()));

    let result = controller
        .run(&subject(), &pool, &policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    let first = &result.passes[0];
    assert_eq!(first.sub_checks, 2);
    let ids: Vec<&str> = first.issues.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["sec-1", "sty-1"]);
    assert_eq!(result.total_issues_fixed, 2);
}

#[tokio::test]
async fn test_regressions_become_outstanding() {
    let fixer = Arc::new(FixAll::default());
    fixer
        .regressions
        .lock()
        .unwrap()
        .push(issue("reg-1", "lint").with_related(IssueId::from("a-1")));

    let pool = registry(vec![(
        "A",
        Scripted::new(vec![vec![issue("a-1", "lint")]]) as Arc<dyn VerificationExecutor>,
    )]);
    let controller = ConvergenceController::new(fixer);
    let policy = ConvergencePolicy {
        required_clean_passes: 1,
        max_iterations: 1,
        ..policy()
    };

    let result = controller
        .run(&subject(), &pool, &policy, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination_reason, TerminationReason::Exhausted);
    let fix = result.passes[0].fix.as_ref().unwrap();
    assert_eq!(fix.fixed, vec![IssueId::from("a-1")]);
    assert_eq!(fix.regressions, vec![IssueId::from("reg-1")]);

    let statuses: Vec<(&str, IssueStatus)> = result
        .outstanding_issues
        .iter()
        .map(|o| (o.issue.id.as_str(), o.status))
        .collect();
    assert_eq!(
        statuses,
        vec![("a-1", IssueStatus::FixedUnverified), ("reg-1", IssueStatus::Unresolved)]
    );
}

#[tokio::test]
async fn test_learning_store_receives_outcomes_and_feeds_hints() {
    let store = Arc::new(MemoryLearningStore::new());
    let fixer = Arc::new(FixAll::default());
    let controller = ConvergenceController::new(fixer.clone())
        .with_learning_store(store.clone())
        .with_selector(ByName::new(&["B", "A", "C", "A", "B"]));

    let result = controller
        .run(&subject(), &scenario_pool(), &policy(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.converged);

    let records = store.all().await.unwrap();
    let names: BTreeSet<(PatternKind, String)> =
        records.iter().map(|r| (r.kind, r.name.clone())).collect();
    assert!(names.contains(&(PatternKind::Antipattern, "lint".to_string())));
    assert!(names.contains(&(PatternKind::Antipattern, "security".to_string())));
    assert!(names.contains(&(PatternKind::Pattern, "fix:lint".to_string())));

    // The second fix call (pass 2, category lint) sees the pattern learned in pass 1.
    let hints = fixer.hints_seen.lock().unwrap().clone();
    assert_eq!(hints[0], 0);
    assert!(hints[1] >= 1);

    let lint_pattern = records
        .iter()
        .find(|r| r.kind == PatternKind::Pattern && r.name == "fix:lint")
        .unwrap();
    assert_eq!(lint_pattern.times_observed, 2);
    assert_eq!(lint_pattern.successes, 2);
}

#[tokio::test]
async fn test_concurrent_runs_share_nothing() {
    let controller = ConvergenceController::new(Arc::new(FixAll::default()));
    let first_pool = scenario_pool();
    let second_pool = registry(vec![("stubborn", Arc::new(Stubborn) as Arc<dyn VerificationExecutor>)]);
    let converging = policy();
    let capped = ConvergencePolicy {
        max_iterations: 2,
        ..policy()
    };
    let first_subject = subject();
    let second_subject = Subject::new("billing-service", Value::Null);
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        controller.run(&first_subject, &first_pool, &converging, &cancel),
        controller.run(&second_subject, &second_pool, &capped, &cancel),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert!(first.converged);
    assert_eq!(first.subject_id, "checkout-service");
    assert_eq!(second.subject_id, "billing-service");
    assert_eq!(second.passes.len(), 2);
    // The stubborn issue is fixed, then re-reported under a fresh identity.
    assert_eq!(second.total_issues_fixed, 2);
}
