//! In-process learning store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::error::LearningResult;
use super::record::{rank_relevant, ObservedOutcome, PatternRecord, RecordKey};
use super::store::{KeyLocks, LearningStore};

/// Learning store backed by a map in memory. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryLearningStore {
    records: RwLock<BTreeMap<RecordKey, PatternRecord>>,
    locks: KeyLocks,
}

impl MemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store, e.g. from a previous run's records.
    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PatternRecord>,
    {
        let records = records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            records: RwLock::new(records),
            locks: KeyLocks::new(),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl LearningStore for MemoryLearningStore {
    async fn find_relevant(&self, tags: &[String]) -> LearningResult<Vec<PatternRecord>> {
        let snapshot: Vec<PatternRecord> = self.records.read().await.values().cloned().collect();
        Ok(rank_relevant(snapshot, tags))
    }

    async fn record_outcome(
        &self,
        category: &str,
        outcome: ObservedOutcome,
    ) -> LearningResult<PatternRecord> {
        let key = outcome.key_for(category);
        let _guard = self.locks.lock(&key).await;
        let now = Utc::now();

        let existing = self.records.read().await.get(&key).cloned();
        let record = match existing {
            Some(mut record) => {
                record.observe(&outcome, now);
                record
            }
            None => PatternRecord::from_outcome(category, &outcome, now)?,
        };

        self.records.write().await.insert(key, record.clone());
        Ok(record)
    }

    async fn all(&self) -> LearningResult<Vec<PatternRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::learning::PatternKind;

    #[tokio::test]
    async fn test_record_then_find() {
        let store = MemoryLearningStore::new();
        store
            .record_outcome(
                "lint",
                ObservedOutcome::new(PatternKind::Pattern, "fix:lint", true).with_resolution("cargo fix"),
            )
            .await
            .unwrap();

        let found = store.find_relevant(&["lint".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resolution, "cargo fix");
        assert!(store.find_relevant(&["docs".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_outcome_updates_same_record() {
        let store = MemoryLearningStore::new();
        let outcome = ObservedOutcome::new(PatternKind::Antipattern, "lint", false);
        store.record_outcome("lint", outcome.clone()).await.unwrap();
        let record = store
            .record_outcome("lint", ObservedOutcome { succeeded: true, ..outcome })
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(record.times_observed, 2);
        assert_eq!(record.successes, 1);
        assert!((record.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_updates() {
        let store = Arc::new(MemoryLearningStore::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .record_outcome(
                        "perf",
                        ObservedOutcome::new(PatternKind::Pattern, "cache", i % 2 == 0),
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].times_observed, 20);
        assert_eq!(all[0].successes, 10);
    }
}
