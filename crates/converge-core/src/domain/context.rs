//! Transient per-run context handed to methodologies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key under which the controller stores the subject identity.
pub const SUBJECT_ID_KEY: &str = "subject_id";

/// Key under which the controller stores the ids of previously reported issues.
pub const ISSUE_HISTORY_KEY: &str = "issue_history";

/// Cumulative working context shared by successive passes of one run.
///
/// Methodologies may read and write arbitrary keys. When a run is configured
/// to clear context between passes, only an explicit allow-list of keys
/// survives the clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassContext {
    entries: BTreeMap<String, serde_json::Value>,
}

impl PassContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry whose key is not in `preserved`.
    ///
    /// Returns the number of entries removed.
    pub fn retain_only(&mut self, preserved: &[String]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| preserved.iter().any(|p| p == k));
        before - self.entries.len()
    }
}
