//! Pattern and antipattern records.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{LearningError, LearningResult};

/// Whether a record describes something that worked or something to avoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Pattern,
    Antipattern,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Pattern => "pattern",
            PatternKind::Antipattern => "antipattern",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a record: `(kind, name, domain tag set)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub kind: PatternKind,
    pub name: String,
    pub tags: BTreeSet<String>,
}

impl RecordKey {
    /// Stable string form, e.g. `antipattern|lint|lint,rust`.
    pub fn canonical(&self) -> String {
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        format!("{}|{}|{}", self.kind, self.name, tags.join(","))
    }

    /// Hex SHA-256 of [`RecordKey::canonical`].
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }
}

/// An observation handed to [`LearningStore::record_outcome`](super::LearningStore::record_outcome).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedOutcome {
    pub kind: PatternKind,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub resolution: String,
    pub succeeded: bool,
}

impl ObservedOutcome {
    pub fn new(kind: PatternKind, name: impl Into<String>, succeeded: bool) -> Self {
        Self {
            kind,
            name: name.into(),
            tags: BTreeSet::new(),
            context: String::new(),
            problem: String::new(),
            resolution: String::new(),
            succeeded,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_problem(mut self, problem: impl Into<String>) -> Self {
        self.problem = problem.into();
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    /// Key the outcome is stored under once `category` joins its tags.
    pub fn key_for(&self, category: &str) -> RecordKey {
        let mut tags = self.tags.clone();
        tags.insert(category.to_string());
        RecordKey {
            kind: self.kind,
            name: self.name.clone(),
            tags,
        }
    }
}

/// A learned pattern or antipattern with its observation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub kind: PatternKind,
    pub name: String,
    pub domain_tags: BTreeSet<String>,
    pub context: String,
    pub problem: String,
    /// The solution for a pattern, the causal description for an antipattern.
    pub resolution: String,
    pub times_observed: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PatternRecord {
    /// First observation of `outcome` under `category`.
    pub fn from_outcome(
        category: &str,
        outcome: &ObservedOutcome,
        now: DateTime<Utc>,
    ) -> LearningResult<Self> {
        if outcome.name.trim().is_empty() {
            return Err(LearningError::InvalidRecord(
                "record name must not be empty".to_string(),
            ));
        }
        let key = outcome.key_for(category);
        let mut record = Self {
            kind: key.kind,
            name: key.name,
            domain_tags: key.tags,
            context: outcome.context.clone(),
            problem: outcome.problem.clone(),
            resolution: outcome.resolution.clone(),
            times_observed: 0,
            successes: 0,
            success_rate: 0.0,
            first_seen: now,
            last_seen: now,
        };
        record.observe(outcome, now);
        Ok(record)
    }

    /// Fold one more observation into the statistics.
    ///
    /// Non-empty descriptive fields of the outcome replace the stored ones.
    pub fn observe(&mut self, outcome: &ObservedOutcome, now: DateTime<Utc>) {
        self.times_observed += 1;
        if outcome.succeeded {
            self.successes += 1;
        }
        self.success_rate = self.successes as f64 / self.times_observed as f64;
        self.last_seen = now;

        for (field, value) in [
            (&mut self.context, &outcome.context),
            (&mut self.problem, &outcome.problem),
            (&mut self.resolution, &outcome.resolution),
        ] {
            if !value.is_empty() {
                *field = value.clone();
            }
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            kind: self.kind,
            name: self.name.clone(),
            tags: self.domain_tags.clone(),
        }
    }

    pub fn shares_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.domain_tags.contains(t))
    }

    pub fn validate(&self) -> LearningResult<()> {
        if self.name.trim().is_empty() {
            return Err(LearningError::InvalidRecord(
                "record name must not be empty".to_string(),
            ));
        }
        if self.successes > self.times_observed {
            return Err(LearningError::InvalidRecord(format!(
                "{}: {} successes out of {} observations",
                self.name, self.successes, self.times_observed
            )));
        }
        Ok(())
    }
}

/// Relevance order: patterns first, then success rate desc, times observed
/// desc, name asc.
pub fn relevance_order(a: &PatternRecord, b: &PatternRecord) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| b.success_rate.total_cmp(&a.success_rate))
        .then_with(|| b.times_observed.cmp(&a.times_observed))
        .then_with(|| a.name.cmp(&b.name))
}

/// Records sharing at least one of `tags`, in [`relevance_order`].
pub fn rank_relevant<I>(records: I, tags: &[String]) -> Vec<PatternRecord>
where
    I: IntoIterator<Item = PatternRecord>,
{
    let mut relevant: Vec<PatternRecord> = records.into_iter().filter(|r| r.shares_tag(tags)).collect();
    relevant.sort_by(relevance_order);
    relevant
}
