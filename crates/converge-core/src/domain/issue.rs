//! Issues reported by verification passes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Stable identity of an issue.
///
/// Once the fix pipeline reports an identity as fixed it is retired for the
/// rest of the run; a genuine recurrence gets a fresh identity linked back
/// through [`Issue::related_to`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        IssueId(format!("issue-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IssueId {
    fn from(s: &str) -> Self {
        IssueId(s.to_string())
    }
}

impl From<String> for IssueId {
    fn from(s: String) -> Self {
        IssueId(s)
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single finding produced by a methodology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub severity: Severity,
    /// Issue class used for learning lookups (e.g. `"lint:unused-import"`).
    pub category: String,
    /// Where the issue lives (file path, section, config key ...).
    pub location: String,
    pub description: String,
    /// Back-reference to the issue this one recurs from or was caused by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_to: Option<IssueId>,
}

impl Issue {
    pub fn new(
        id: impl Into<IssueId>,
        severity: Severity,
        category: impl Into<String>,
        location: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            category: category.into(),
            location: location.into(),
            description: description.into(),
            related_to: None,
        }
    }

    /// Link this issue back to the one that caused it.
    pub fn with_related(mut self, related: IssueId) -> Self {
        self.related_to = Some(related);
        self
    }

    /// Re-identify a reported issue whose identity was already retired.
    ///
    /// The copy keeps severity, category, location and description, gets a
    /// fresh identity, and points back at the retired one.
    pub fn as_recurrence(&self) -> Issue {
        Issue {
            id: IssueId::generate(),
            related_to: Some(self.id.clone()),
            ..self.clone()
        }
    }
}
