//! JSON-scripted scenarios for `converge simulate` and `converge batch`.
//!
//! A scenario scripts what every methodology reports on each of its
//! invocations, how the fix pipeline behaves and, for batches, what each
//! operation does. Example:
//!
//! ```json
//! {
//!   "subject": {"id": "checkout-service"},
//!   "methodologies": [
//!     {"name": "static", "passes": [[{"id": "i-1", "severity": "high", "category": "lint",
//!                                     "location": "src/lib.rs", "description": "unused"}]]},
//!     {"name": "review"}
//!   ],
//!   "fixer": {"unfixable": ["flaky-test"]},
//!   "selection": ["static", "review"]
//! }
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use converge_core::convergence::{MethodologySelector, RandomSelector};
use converge_core::domain::{
    Issue, Methodology, MethodologyError, MethodologyResult, PassContext, PassResult,
    ReviewerProfile, Subject, VerificationExecutor,
};
use converge_core::fix::{FixError, FixExecutor, FixOutcome, FixResult};
use converge_core::learning::PatternRecord;
use converge_core::parallel::{Operation, TaskError, TaskOutput};
use converge_core::registry::MethodologyRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub subject: Subject,
    #[serde(default)]
    pub methodologies: Vec<MethodologyScript>,
    #[serde(default)]
    pub fixer: FixerScript,
    /// Methodology names to pick, in order. Random choice once exhausted.
    #[serde(default)]
    pub selection: Vec<String>,
    #[serde(default)]
    pub batch: Vec<OperationScript>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodologyScript {
    pub name: String,
    #[serde(default)]
    pub profile: Option<ReviewerProfile>,
    /// Issues reported on each invocation. Once used up the methodology
    /// reports clean, or repeats the last entry when `repeat_last` is set.
    #[serde(default)]
    pub passes: Vec<Vec<Issue>>,
    #[serde(default)]
    pub repeat_last: bool,
    /// 1-indexed invocations that fail instead of reporting.
    #[serde(default)]
    pub fail_on: Vec<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixerScript {
    /// Issue categories the fixer never resolves.
    #[serde(default)]
    pub unfixable: Vec<String>,
    /// Every fix invocation fails.
    #[serde(default)]
    pub fail: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationScript {
    pub id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub delay_ms: u64,
    /// Number of leading executions that fail.
    #[serde(default)]
    pub fail_times: u32,
    #[serde(default)]
    pub resource_exhausted: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub writes: Vec<String>,
    #[serde(default)]
    pub removes: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario: {:?}", path))?;
        Self::from_json(&raw).with_context(|| format!("Invalid scenario: {:?}", path))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn registry(&self) -> Result<MethodologyRegistry> {
        let mut registry = MethodologyRegistry::new();
        for script in &self.methodologies {
            let mut methodology = Methodology::new(
                script.name.clone(),
                Arc::new(ScriptedMethodology::new(script)),
            );
            if let Some(profile) = &script.profile {
                methodology = methodology.with_profile(profile.clone());
            }
            registry
                .register(methodology)
                .with_context(|| format!("Cannot register methodology {}", script.name))?;
        }
        Ok(registry)
    }

    pub fn fixer(&self) -> ScriptedFixer {
        ScriptedFixer {
            script: self.fixer.clone(),
        }
    }

    pub fn selector(&self, seed: Option<u64>) -> ScriptedSelector {
        let fallback = match seed {
            Some(seed) => RandomSelector::seeded(seed),
            None => RandomSelector::new(),
        };
        ScriptedSelector {
            order: Mutex::new(self.selection.iter().cloned().collect()),
            fallback,
        }
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.batch.iter().map(OperationScript::to_operation).collect()
    }
}

struct Script {
    passes: VecDeque<Vec<Issue>>,
    last: Vec<Issue>,
    invocations: u32,
}

/// Verification executor replaying a [`MethodologyScript`].
pub struct ScriptedMethodology {
    script: Mutex<Script>,
    repeat_last: bool,
    fail_on: Vec<u32>,
}

impl ScriptedMethodology {
    pub fn new(script: &MethodologyScript) -> Self {
        Self {
            script: Mutex::new(Script {
                passes: script.passes.iter().cloned().collect(),
                last: Vec::new(),
                invocations: 0,
            }),
            repeat_last: script.repeat_last,
            fail_on: script.fail_on.clone(),
        }
    }
}

#[async_trait]
impl VerificationExecutor for ScriptedMethodology {
    async fn verify(
        &self,
        _subject: &Subject,
        _context: &mut PassContext,
        profile: &ReviewerProfile,
    ) -> MethodologyResult<PassResult> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.invocations += 1;
        if self.fail_on.contains(&script.invocations) {
            return Err(MethodologyError::failed(format!(
                "scripted failure on invocation {}",
                script.invocations
            )));
        }

        let issues = match script.passes.pop_front() {
            Some(issues) => {
                script.last = issues.clone();
                issues
            }
            None if self.repeat_last => script.last.clone(),
            None => Vec::new(),
        };
        Ok(PassResult::from_issues(
            issues,
            serde_json::json!({ "reviewer": profile.name, "invocation": script.invocations }),
        ))
    }
}

/// Fix pipeline resolving every issue outside the unfixable categories.
pub struct ScriptedFixer {
    script: FixerScript,
}

#[async_trait]
impl FixExecutor for ScriptedFixer {
    async fn fix(
        &self,
        _subject: &Subject,
        issues: &[Issue],
        _hints: &[PatternRecord],
    ) -> FixResult<FixOutcome> {
        if self.script.fail {
            return Err(FixError::Failed("scripted fixer failure".to_string()));
        }
        let (unresolved, fixed): (Vec<Issue>, Vec<Issue>) = issues
            .iter()
            .cloned()
            .partition(|i| self.script.unfixable.contains(&i.category));
        Ok(FixOutcome {
            fixed: fixed.into_iter().map(|i| i.id).collect(),
            unresolved,
            regressions: Vec::new(),
        })
    }
}

/// Follows the scripted order, then falls back to random choice.
pub struct ScriptedSelector {
    order: Mutex<VecDeque<String>>,
    fallback: RandomSelector,
}

impl MethodologySelector for ScriptedSelector {
    fn select(&self, candidates: &[&Methodology]) -> usize {
        let next = self
            .order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.and_then(|name| candidates.iter().position(|m| m.name() == name))
            .unwrap_or_else(|| self.fallback.select(candidates))
    }
}

impl OperationScript {
    fn output(&self) -> TaskOutput {
        let mut output = TaskOutput::new(self.value.clone());
        for artifact in &self.produces {
            output = output.producing(artifact.clone());
        }
        for target in &self.writes {
            output = output.writing(target.clone());
        }
        for entity in &self.removes {
            output = output.removing(entity.clone());
        }
        for entity in &self.depends_on {
            output = output.depending_on(entity.clone());
        }
        output
    }

    fn to_operation(&self) -> Operation {
        let output = self.output();
        let delay = Duration::from_millis(self.delay_ms);
        let fail_times = self.fail_times;
        let resource_exhausted = self.resource_exhausted;
        let id = self.id.clone();
        let executions = Arc::new(AtomicU32::new(0));

        let operation = Operation::new(self.id.clone(), move || {
            let output = output.clone();
            let id = id.clone();
            let executions = Arc::clone(&executions);
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let execution = executions.fetch_add(1, Ordering::SeqCst) + 1;
                if execution <= fail_times {
                    let reason = format!("{id}: scripted failure {execution}/{fail_times}");
                    return Err(if resource_exhausted {
                        TaskError::ResourceExhausted(reason)
                    } else {
                        TaskError::failed(reason)
                    });
                }
                Ok(output)
            }
        });
        match self.timeout_ms {
            Some(ms) => operation.with_timeout(Duration::from_millis(ms)),
            None => operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::domain::IssueId;

    const SCENARIO: &str = r#"{
        "subject": {"id": "svc"},
        "methodologies": [
            {"name": "static", "passes": [[
                {"id": "i-1", "severity": "high", "category": "lint", "location": "a.rs", "description": "unused"},
                {"id": "i-2", "severity": "low", "category": "flaky-test", "location": "b.rs", "description": "flaky"}
            ]]},
            {"name": "review", "fail_on": [1]}
        ],
        "fixer": {"unfixable": ["flaky-test"]},
        "selection": ["review", "static"],
        "batch": [
            {"id": "op-1", "value": 1, "writes": ["config.yaml"]},
            {"id": "op-2", "fail_times": 1}
        ]
    }"#;

    fn subject() -> Subject {
        Subject::new("svc", Value::Null)
    }

    #[test]
    fn test_scenario_parses_with_defaults() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.subject.id, "svc");
        assert_eq!(scenario.methodologies.len(), 2);
        assert!(!scenario.methodologies[0].repeat_last);
        assert!(!scenario.fixer.fail);
        assert_eq!(scenario.batch[1].fail_times, 1);
        assert_eq!(scenario.registry().unwrap().names(), vec!["static", "review"]);
    }

    #[tokio::test]
    async fn test_scripted_methodology_replays_then_reports_clean() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let executor = ScriptedMethodology::new(&scenario.methodologies[0]);
        let mut context = PassContext::new();
        let profile = ReviewerProfile::default();

        let first = executor.verify(&subject(), &mut context, &profile).await.unwrap();
        assert_eq!(first.issues.len(), 2);
        let second = executor.verify(&subject(), &mut context, &profile).await.unwrap();
        assert!(second.clean);
    }

    #[tokio::test]
    async fn test_scripted_failure_on_invocation() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let executor = ScriptedMethodology::new(&scenario.methodologies[1]);
        let mut context = PassContext::new();
        let profile = ReviewerProfile::default();

        assert!(executor.verify(&subject(), &mut context, &profile).await.is_err());
        assert!(executor.verify(&subject(), &mut context, &profile).await.is_ok());
    }

    #[tokio::test]
    async fn test_fixer_skips_unfixable_categories() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let issues = scenario.methodologies[0].passes[0].clone();

        let outcome = scenario.fixer().fix(&subject(), &issues, &[]).await.unwrap();
        assert_eq!(outcome.fixed, vec![IssueId::from("i-1")]);
        assert_eq!(outcome.unresolved.len(), 1);
        assert_eq!(outcome.unresolved[0].category, "flaky-test");
    }

    #[test]
    fn test_selector_follows_script() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let registry = scenario.registry().unwrap();
        let candidates: Vec<&Methodology> = registry.iter().collect();
        let selector = scenario.selector(Some(7));

        assert_eq!(candidates[selector.select(&candidates)].name(), "review");
        assert_eq!(candidates[selector.select(&candidates)].name(), "static");
        assert!(selector.select(&candidates) < candidates.len());
    }

    #[tokio::test]
    async fn test_operation_fails_scripted_number_of_times() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let ops = scenario.operations();

        assert!(ops[1].execute().await.is_err());
        assert!(ops[1].execute().await.is_ok());
        let output = ops[0].execute().await.unwrap();
        assert_eq!(output.writes, vec!["config.yaml".to_string()]);
    }
}
