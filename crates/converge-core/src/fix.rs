//! Contract with the external fix pipeline.
//!
//! The controller hands every non-clean pass's open issues to a
//! [`FixExecutor`] together with hints from the learning store. How fixes are
//! applied is entirely up to the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Issue, IssueId, Subject};
use crate::learning::PatternRecord;

/// Errors raised by a fix pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixError {
    #[error("fix pipeline failed: {0}")]
    Failed(String),

    #[error("fix pipeline timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

pub type FixResult<T> = std::result::Result<T, FixError>;

/// What one fix invocation achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    /// Identities the pipeline resolved. They are retired for the rest of the run.
    pub fixed: Vec<IssueId>,
    /// Issues the pipeline attempted but could not resolve.
    pub unresolved: Vec<Issue>,
    /// New issues introduced by the fixes, linked through `related_to`.
    pub regressions: Vec<Issue>,
}

impl FixOutcome {
    pub fn fixed_count(&self) -> usize {
        self.fixed.len()
    }
}

/// External fix pipeline.
#[async_trait]
pub trait FixExecutor: Send + Sync {
    async fn fix(
        &self,
        subject: &Subject,
        issues: &[Issue],
        hints: &[PatternRecord],
    ) -> FixResult<FixOutcome>;
}

/// Fix pipeline that resolves nothing. Useful for verification-only runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFixer;

#[async_trait]
impl FixExecutor for NoopFixer {
    async fn fix(
        &self,
        _subject: &Subject,
        issues: &[Issue],
        _hints: &[PatternRecord],
    ) -> FixResult<FixOutcome> {
        Ok(FixOutcome {
            fixed: Vec::new(),
            unresolved: issues.to_vec(),
            regressions: Vec::new(),
        })
    }
}
