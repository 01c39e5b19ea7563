//! File-backed pattern store
//!
//! One JSON record per line in `<dir>/patterns.jsonl`. The file is read on
//! first use; after that every new record is appended and synced before it
//! becomes visible to queries, so learned patterns outlive the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use super::store::{
    check_storable, InMemoryPatternStore, Inner, Pattern, PatternQuery, PatternStore,
    PatternSummary, SharedPatternStore, StoreError, StoreOutcome, StoreResult,
};
use crate::config::MemoryConfig;

const PATTERNS_FILE: &str = "patterns.jsonl";

fn unavailable(path: &Path, error: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {}", path.display(), error))
}

/// File-backed store when `memory.dir` is set, in-process otherwise
pub fn store_from_config(config: &MemoryConfig) -> SharedPatternStore {
    match &config.dir {
        Some(dir) => FilePatternStore::new(dir).shared(),
        None => InMemoryPatternStore::new().shared(),
    }
}

/// Pattern store persisted as JSONL, de-duplicated by fingerprint
pub struct FilePatternStore {
    dir: PathBuf,
    inner: OnceCell<RwLock<Inner>>,
}

impl FilePatternStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inner: OnceCell::new(),
        }
    }

    pub fn shared(self) -> SharedPatternStore {
        Arc::new(self)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(PATTERNS_FILE)
    }

    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.inner().await?.read().await.patterns.len())
    }

    /// Every stored record, in insertion order
    pub async fn patterns(&self) -> StoreResult<Vec<Pattern>> {
        Ok(self.inner().await?.read().await.patterns.clone())
    }

    async fn inner(&self) -> StoreResult<&RwLock<Inner>> {
        self.inner.get_or_try_init(|| self.load()).await
    }

    /// Read every complete record; a torn trailing line is cut off
    async fn load(&self) -> StoreResult<RwLock<Inner>> {
        let path = self.path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RwLock::new(Inner::default()))
            }
            Err(e) => return Err(unavailable(&path, e)),
        };

        let complete = raw
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut inner = Inner::default();
        let mut skipped = 0usize;
        for line in raw[..complete].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Pattern>(line) {
                Ok(pattern) => {
                    let fingerprint = pattern.fingerprint();
                    inner.insert(fingerprint, pattern);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(path = %path.display(), "Skipping unreadable pattern record: {}", e);
                }
            }
        }

        if raw.len() > complete {
            warn!(
                path = %path.display(),
                torn_bytes = raw.len() - complete,
                "Truncating torn tail of pattern file"
            );
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .await
                .map_err(|e| unavailable(&path, e))?;
            file.set_len(complete as u64)
                .await
                .map_err(|e| unavailable(&path, e))?;
        }

        info!(
            path = %path.display(),
            patterns = inner.patterns.len(),
            skipped,
            "Loaded pattern store"
        );
        Ok(RwLock::new(inner))
    }

    async fn append(&self, line: &[u8]) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;

        let path = self.path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| unavailable(&path, e))?;
        let before = file
            .metadata()
            .await
            .map_err(|e| unavailable(&path, e))?
            .len();

        let written = async {
            file.write_all(line).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            // Drop whatever part of the line reached the file
            if let Err(trunc) = file.set_len(before).await {
                warn!(path = %path.display(), "Failed to roll back partial record: {}", trunc);
            }
            return Err(unavailable(&path, e));
        }
        Ok(())
    }
}

#[async_trait]
impl PatternStore for FilePatternStore {
    async fn store(&self, pattern: Pattern) -> StoreResult<StoreOutcome> {
        check_storable(&pattern)?;
        let fingerprint = pattern.fingerprint();
        let mut inner = self.inner().await?.write().await;
        if inner.contains(&fingerprint) {
            return Ok(StoreOutcome::Duplicate);
        }

        let mut line =
            serde_json::to_vec(&pattern).map_err(|e| StoreError::Rejected(e.to_string()))?;
        line.push(b'\n');
        self.append(&line).await?;

        debug!(kind = %pattern.kind, name = %pattern.name, "Pattern persisted");
        Ok(inner.insert(fingerprint, pattern))
    }

    async fn query(&self, query: &PatternQuery) -> StoreResult<Vec<PatternSummary>> {
        Ok(self.inner().await?.read().await.rank(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ComplexityBucket, PatternKind};
    use chrono::Utc;

    fn pattern(name: &str, content: &str) -> Pattern {
        Pattern {
            name: name.into(),
            kind: PatternKind::Function,
            content: content.into(),
            language: "rust".into(),
            context: "token bucket rate limiter".into(),
            complexity: ComplexityBucket::Low,
            success_score: 0.8,
            task_id: "t1".into(),
            created_at: Utc::now(),
        }
    }

    fn query(description: &str) -> PatternQuery {
        PatternQuery {
            description: description.into(),
            language: Some("rust".into()),
            limit: 5,
        }
    }

    #[tokio::test]
    async fn test_patterns_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePatternStore::new(dir.path());
        store
            .store(pattern("refill", "fn refill(bucket) {}"))
            .await
            .unwrap();
        store
            .store(pattern("drain", "fn drain(bucket) {}"))
            .await
            .unwrap();

        let reopened = FilePatternStore::new(dir.path());
        assert_eq!(reopened.len().await.unwrap(), 2);
        let hits = reopened.query(&query("refill the bucket")).await.unwrap();
        assert_eq!(hits[0].name, "refill");
    }

    #[tokio::test]
    async fn test_duplicates_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePatternStore::new(dir.path());
        let p = pattern("refill", "fn refill(bucket) {}");
        assert_eq!(store.store(p.clone()).await.unwrap(), StoreOutcome::Stored);
        assert_eq!(store.store(p.clone()).await.unwrap(), StoreOutcome::Duplicate);

        let reopened = FilePatternStore::new(dir.path());
        assert_eq!(reopened.store(p).await.unwrap(), StoreOutcome::Duplicate);
        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_torn_tail_is_cut_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePatternStore::new(dir.path());
        store
            .store(pattern("refill", "fn refill(bucket) {}"))
            .await
            .unwrap();

        let path = store.path();
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(br#"{"name":"half","kind":"func"#);
        tokio::fs::write(&path, &raw).await.unwrap();

        let reopened = FilePatternStore::new(dir.path());
        reopened
            .store(pattern("drain", "fn drain(bucket) {}"))
            .await
            .unwrap();

        let names: Vec<String> = FilePatternStore::new(dir.path())
            .patterns()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["refill", "drain"]);
    }

    #[tokio::test]
    async fn test_unreadable_directory_degrades_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = FilePatternStore::new(&blocker);
        let err = store
            .store(pattern("refill", "fn refill(bucket) {}"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
