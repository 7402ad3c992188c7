//! The learning store contract and per-key write exclusion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::LearningResult;
use super::record::{ObservedOutcome, PatternRecord, RecordKey};

/// Persistent memory of patterns and antipatterns shared across runs.
///
/// Readers may observe a slightly stale snapshot; writes to the same record
/// key are serialized.
#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Records sharing at least one of `tags`, most useful first.
    async fn find_relevant(&self, tags: &[String]) -> LearningResult<Vec<PatternRecord>>;

    /// Update the record keyed by `(kind, name, tags ∪ {category})`, creating
    /// it on first observation. Returns the stored record.
    async fn record_outcome(
        &self,
        category: &str,
        outcome: ObservedOutcome,
    ) -> LearningResult<PatternRecord>;

    /// Snapshot of every record.
    async fn all(&self) -> LearningResult<Vec<PatternRecord>>;
}

/// Lazily created async mutex per record key.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `key`.
    pub async fn lock(&self, key: &RecordKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.canonical()).or_default())
        };
        lock.lock_owned().await
    }
}
