//! Independent cleanliness judgement.

use async_trait::async_trait;

use crate::domain::{PassResult, Subject};

/// Decides whether a pass left the subject clean.
///
/// The controller never trusts a methodology's self-report; it asks the
/// oracle instead.
#[async_trait]
pub trait CleanlinessOracle: Send + Sync {
    async fn is_clean(&self, subject: &Subject, result: &PassResult) -> bool;
}

/// Clean iff the pass reported no issues, whatever it claimed.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueFreeOracle;

#[async_trait]
impl CleanlinessOracle for IssueFreeOracle {
    async fn is_clean(&self, _subject: &Subject, result: &PassResult) -> bool {
        result.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Issue, Severity};

    #[tokio::test]
    async fn test_self_report_is_ignored() {
        let subject = Subject::new("s", serde_json::Value::Null);
        let lying = PassResult::new(
            true,
            vec![Issue::new("i", Severity::Low, "docs", "README.md", "typo")],
            serde_json::Value::Null,
        );
        assert!(!IssueFreeOracle.is_clean(&subject, &lying).await);

        let pessimist = PassResult::new(false, Vec::new(), serde_json::Value::Null);
        assert!(IssueFreeOracle.is_clean(&subject, &pessimist).await);
    }
}
