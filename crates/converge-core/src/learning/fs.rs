//! Learning store persisted as JSON files, shared by every handle opened on
//! the same directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::error::{LearningError, LearningResult};
use super::record::{rank_relevant, ObservedOutcome, PatternKind, PatternRecord, RecordKey};
use super::store::{KeyLocks, LearningStore};

/// Filesystem-backed learning store, one JSON document per record.
///
/// Layout: `<root>/<kind>/<sha256 of canonical key>.json`
///
/// Writes go through a temp file in the same directory and are renamed into
/// place, so readers only ever see complete records.
#[derive(Debug, Clone)]
pub struct FsLearningStore {
    root: PathBuf,
    locks: Arc<KeyLocks>,
}

impl FsLearningStore {
    /// Open a store rooted at `root`, creating the kind directories if needed.
    pub fn open(root: impl AsRef<Path>) -> LearningResult<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in [PatternKind::Pattern, PatternKind::Antipattern] {
            fs::create_dir_all(root.join(kind.as_str()))?;
        }
        Ok(Self {
            root,
            locks: Arc::new(KeyLocks::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &RecordKey) -> PathBuf {
        record_path(&self.root, key)
    }
}

fn record_path(root: &Path, key: &RecordKey) -> PathBuf {
    root.join(key.kind.as_str()).join(format!("{}.json", key.digest()))
}

fn read_record(path: &Path) -> LearningResult<Option<PatternRecord>> {
    match fs::read(path) {
        Ok(bytes) => {
            let record: PatternRecord = serde_json::from_slice(&bytes)?;
            record.validate()?;
            Ok(Some(record))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LearningError::Io(e)),
    }
}

fn write_record(path: &Path, record: &PatternRecord) -> LearningResult<()> {
    let dir = path.parent().ok_or_else(|| {
        LearningError::InvalidRecord(format!("no parent directory for {}", path.display()))
    })?;
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(record)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Load every readable record under `root`. Unreadable files are skipped.
fn load_all(root: &Path) -> LearningResult<Vec<PatternRecord>> {
    let mut records = Vec::new();
    for kind in [PatternKind::Pattern, PatternKind::Antipattern] {
        let dir = root.join(kind.as_str());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable pattern record"),
            }
        }
    }
    Ok(records)
}

async fn blocking<T, F>(f: F) -> LearningResult<T>
where
    F: FnOnce() -> LearningResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LearningError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl LearningStore for FsLearningStore {
    async fn find_relevant(&self, tags: &[String]) -> LearningResult<Vec<PatternRecord>> {
        let root = self.root.clone();
        let snapshot = blocking(move || load_all(&root)).await?;
        Ok(rank_relevant(snapshot, tags))
    }

    async fn record_outcome(
        &self,
        category: &str,
        outcome: ObservedOutcome,
    ) -> LearningResult<PatternRecord> {
        let key = outcome.key_for(category);
        let _guard = self.locks.lock(&key).await;
        let path = self.record_path(&key);
        let category = category.to_string();

        let record = blocking(move || {
            let now = Utc::now();
            let record = match read_record(&path)? {
                Some(mut record) => {
                    record.observe(&outcome, now);
                    record
                }
                None => PatternRecord::from_outcome(&category, &outcome, now)?,
            };
            write_record(&path, &record)?;
            Ok(record)
        })
        .await?;

        debug!(
            kind = %record.kind,
            name = %record.name,
            times_observed = record.times_observed,
            "pattern record updated"
        );
        Ok(record)
    }

    async fn all(&self) -> LearningResult<Vec<PatternRecord>> {
        let root = self.root.clone();
        let mut records = blocking(move || load_all(&root)).await?;
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(records)
    }
}
