//! Learning store contract, exercised against both backends.

use std::sync::Arc;

use converge_core::learning::{
    FsLearningStore, LearningStore, MemoryLearningStore, ObservedOutcome, PatternKind,
};

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

async fn check_concurrent_outcomes_are_all_counted(store: Arc<dyn LearningStore>) {
    let mut handles = Vec::new();
    for i in 0..20 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let outcome = ObservedOutcome::new(PatternKind::Pattern, "pin-dependency", i % 4 != 0)
                .with_resolution("pin the transitive dependency");
            store.record_outcome("dependency", outcome).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let records = store.find_relevant(&tags(&["dependency"])).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.times_observed, 20);
    assert_eq!(record.successes, 15);
    assert!((record.success_rate - 0.75).abs() < 1e-9);
}

async fn check_ranking_puts_patterns_first(store: Arc<dyn LearningStore>) {
    let outcomes = [
        ObservedOutcome::new(PatternKind::Antipattern, "retry-forever", false),
        ObservedOutcome::new(PatternKind::Pattern, "add-timeout", true),
        ObservedOutcome::new(PatternKind::Pattern, "bump-pool-size", false),
    ];
    for outcome in outcomes {
        store.record_outcome("timeout", outcome).await.unwrap();
    }
    store
        .record_outcome(
            "docs",
            ObservedOutcome::new(PatternKind::Pattern, "fix-typo", true),
        )
        .await
        .unwrap();

    let records = store.find_relevant(&tags(&["timeout"])).await.unwrap();
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["add-timeout", "bump-pool-size", "retry-forever"]);

    assert!(store.find_relevant(&tags(&["unknown"])).await.unwrap().is_empty());
    assert_eq!(store.all().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_memory_store_counts_concurrent_outcomes() {
    check_concurrent_outcomes_are_all_counted(Arc::new(MemoryLearningStore::new())).await;
}

#[tokio::test]
async fn test_fs_store_counts_concurrent_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    check_concurrent_outcomes_are_all_counted(Arc::new(FsLearningStore::open(dir.path()).unwrap()))
        .await;
}

#[tokio::test]
async fn test_memory_store_ranking() {
    check_ranking_puts_patterns_first(Arc::new(MemoryLearningStore::new())).await;
}

#[tokio::test]
async fn test_fs_store_ranking() {
    let dir = tempfile::tempdir().unwrap();
    check_ranking_puts_patterns_first(Arc::new(FsLearningStore::open(dir.path()).unwrap())).await;
}

#[tokio::test]
async fn test_fs_store_shares_state_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let first = FsLearningStore::open(dir.path()).unwrap();
    let second = FsLearningStore::open(dir.path()).unwrap();

    first
        .record_outcome(
            "lint",
            ObservedOutcome::new(PatternKind::Antipattern, "unused-import", false)
                .with_problem("imports left behind after refactor"),
        )
        .await
        .unwrap();
    let updated = second
        .record_outcome(
            "lint",
            ObservedOutcome::new(PatternKind::Antipattern, "unused-import", true),
        )
        .await
        .unwrap();

    assert_eq!(updated.times_observed, 2);
    assert_eq!(updated.successes, 1);
    assert_eq!(updated.problem, "imports left behind after refactor");
}

#[tokio::test]
async fn test_invalid_outcome_is_rejected() {
    let store = MemoryLearningStore::new();
    let result = store
        .record_outcome("lint", ObservedOutcome::new(PatternKind::Pattern, "", true))
        .await;
    assert!(result.is_err());
    assert!(store.is_empty().await);
}
