//! Output of a single methodology invocation.

use serde::{Deserialize, Serialize};

use super::issue::Issue;

/// What a methodology reported about the subject.
///
/// `clean` is the methodology's own verdict. The controller records it but
/// decides cleanliness through an independent oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassResult {
    pub clean: bool,
    pub issues: Vec<Issue>,
    /// Opaque diagnostic payload (logs, transcripts, digests ...).
    #[serde(default)]
    pub evidence: serde_json::Value,
}

impl PassResult {
    pub fn new(clean: bool, issues: Vec<Issue>, evidence: serde_json::Value) -> Self {
        Self {
            clean,
            issues,
            evidence,
        }
    }

    /// A result whose self-report is derived from the issue list.
    pub fn from_issues(issues: Vec<Issue>, evidence: serde_json::Value) -> Self {
        Self {
            clean: issues.is_empty(),
            issues,
            evidence,
        }
    }

    /// A result reporting no issues.
    pub fn clean_with(evidence: serde_json::Value) -> Self {
        Self::from_issues(Vec::new(), evidence)
    }

    /// Combine the results of independent sub-checks into one pass result.
    ///
    /// Issues are concatenated in input order; the merged self-report is clean
    /// only when every part reported clean. Evidence is kept per part.
    pub fn merge(parts: Vec<PassResult>) -> PassResult {
        let clean = parts.iter().all(|p| p.clean);
        let mut issues = Vec::new();
        let mut evidence = Vec::with_capacity(parts.len());
        for part in parts {
            issues.extend(part.issues);
            evidence.push(part.evidence);
        }
        PassResult {
            clean,
            issues,
            evidence: serde_json::Value::Array(evidence),
        }
    }
}
