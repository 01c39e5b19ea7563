//! Ordered append-only topic logs
//!
//! The bus only needs two operations from its backing log: append with the
//! next sequence number, and read from an offset. Two implementations:
//!
//! - `MemoryEventLog`: process-local, for tests and embedded use
//! - `FileEventLog`: one JSONL file per topic, one entry per line
//!
//! A reader racing a writer may see a partially written last line; it is
//! skipped and picked up on the next read. File readers resume from the
//! byte offset where an earlier read stopped instead of rescanning the file.

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::types::{BusEntry, BusEvent, Sequence};

/// Error type for state-bus operations
#[derive(Debug, thiserror::Error)]
pub enum StateBusError {
    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("Topic log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for state-bus operations
pub type StateBusResult<T> = Result<T, StateBusError>;

/// Shared reference to an event log
pub type SharedEventLog = Arc<dyn EventLog>;

/// Topic names are used as file names
pub fn validate_topic(topic: &str) -> StateBusResult<()> {
    let ok = !topic.is_empty()
        && topic.len() <= 128
        && !topic.starts_with('.')
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StateBusError::InvalidTopic(topic.to_string()))
    }
}

/// Append + tail-from-offset
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append with the next sequence number of `topic`
    async fn append(&self, topic: &str, event: BusEvent) -> StateBusResult<BusEntry>;

    /// Up to `limit` entries with `seq >= from`, in order
    async fn read_from(
        &self,
        topic: &str,
        from: Sequence,
        limit: usize,
    ) -> StateBusResult<Vec<BusEntry>>;

    /// Next sequence number that will be assigned
    async fn head(&self, topic: &str) -> StateBusResult<Sequence>;
}

/// In-process topic logs
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    topics: RwLock<HashMap<String, Vec<BusEntry>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, topic: &str, event: BusEvent) -> StateBusResult<BusEntry> {
        validate_topic(topic)?;
        let mut topics = self.topics.write().await;
        let log = topics.entry(topic.to_string()).or_default();
        let entry = BusEntry {
            topic: topic.to_string(),
            seq: log.len() as Sequence,
            published_at: Utc::now(),
            event,
        };
        log.push(entry.clone());
        Ok(entry)
    }

    async fn read_from(
        &self,
        topic: &str,
        from: Sequence,
        limit: usize,
    ) -> StateBusResult<Vec<BusEntry>> {
        validate_topic(topic)?;
        let topics = self.topics.read().await;
        Ok(topics
            .get(topic)
            .map(|log| {
                log.iter()
                    .skip(from as usize)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn head(&self, topic: &str) -> StateBusResult<Sequence> {
        validate_topic(topic)?;
        let topics = self.topics.read().await;
        Ok(topics.get(topic).map(|log| log.len() as Sequence).unwrap_or(0))
    }
}

/// Append position of one topic file as last seen by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TopicHead {
    next: Sequence,
    /// File length after the last complete entry
    len: u64,
}

/// One JSONL file per topic under a directory
#[derive(Debug)]
pub struct FileEventLog {
    dir: PathBuf,
    /// Loaded lazily under the append lock; trusted only while the file
    /// length still matches
    heads: Mutex<HashMap<String, TopicHead>>,
    /// Per topic: sequence number -> byte offset of the line holding it
    offsets: Mutex<HashMap<String, BTreeMap<Sequence, u64>>>,
}

impl FileEventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            heads: Mutex::new(HashMap::new()),
            offsets: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn topic_path(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{topic}.jsonl"))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StateBusError {
        StateBusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Complete entries of a topic file; a torn trailing line is ignored
    async fn read_all(&self, topic: &str) -> StateBusResult<(Vec<BusEntry>, usize)> {
        let path = self.topic_path(topic);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(Self::io_err(&path, e)),
        };

        // Bytes up to and including the last newline are complete
        let complete = raw
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut entries = Vec::new();
        for line in raw[..complete].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<BusEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(topic, "Skipping unreadable bus entry: {}", e),
            }
        }
        Ok((entries, complete))
    }

    async fn file_len(path: &Path) -> StateBusResult<u64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Self::io_err(path, e)),
        }
    }

    /// Head for a topic, repairing a torn tail left by a crashed writer
    async fn load_head(&self, topic: &str) -> StateBusResult<TopicHead> {
        let path = self.topic_path(topic);
        let (entries, complete) = self.read_all(topic).await?;

        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.len() as usize > complete {
                warn!(
                    topic,
                    torn_bytes = meta.len() as usize - complete,
                    "Truncating torn tail of topic log"
                );
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .await
                    .map_err(|e| Self::io_err(&path, e))?;
                file.set_len(complete as u64)
                    .await
                    .map_err(|e| Self::io_err(&path, e))?;
            }
        }

        Ok(TopicHead {
            next: entries.last().map(|e| e.seq + 1).unwrap_or(0),
            len: complete as u64,
        })
    }
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, topic: &str, event: BusEvent) -> StateBusResult<BusEntry> {
        validate_topic(topic)?;
        let mut heads = self.heads.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_err(&self.dir, e))?;

        let path = self.topic_path(topic);
        let on_disk = Self::file_len(&path).await?;
        let cached = heads.get(topic).copied();
        let head = match cached {
            Some(head) if head.len == on_disk => head,
            _ => {
                if cached.is_some() {
                    warn!(topic, on_disk, "Topic log changed under the cached head; reloading");
                    self.offsets.lock().await.remove(topic);
                }
                let head = self.load_head(topic).await?;
                heads.insert(topic.to_string(), head);
                head
            }
        };
        let seq = head.next;

        let entry = BusEntry {
            topic: topic.to_string(),
            seq,
            published_at: Utc::now(),
            event,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let opened = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) => {
                heads.remove(topic);
                return Err(Self::io_err(&path, e));
            }
        };
        let written = async {
            file.write_all(&line).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            // Whatever reached the file is cut off by the next load
            heads.remove(topic);
            if let Err(trunc) = file.set_len(head.len).await {
                warn!(topic, "Failed to roll back partial bus entry: {}", trunc);
            }
            return Err(Self::io_err(&path, e));
        }

        heads.insert(
            topic.to_string(),
            TopicHead {
                next: seq + 1,
                len: head.len + line.len() as u64,
            },
        );
        debug!(topic, seq, "Appended bus entry");
        Ok(entry)
    }

    async fn read_from(
        &self,
        topic: &str,
        from: Sequence,
        limit: usize,
    ) -> StateBusResult<Vec<BusEntry>> {
        validate_topic(topic)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let path = self.topic_path(topic);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(&path, e)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| Self::io_err(&path, e))?
            .len();

        let start = {
            let mut offsets = self.offsets.lock().await;
            let known = offsets.entry(topic.to_string()).or_default();
            match known.range(..=from).next_back() {
                Some((_, offset)) if *offset <= len => *offset,
                Some(_) => {
                    // File shrank since the offsets were taken
                    known.clear();
                    0
                }
                None => 0,
            }
        };
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| Self::io_err(&path, e))?;

        let mut reader = BufReader::new(file);
        let mut position = start;
        let mut resume: Option<(Sequence, u64)> = None;
        let mut entries = Vec::new();
        let mut line = Vec::new();
        while entries.len() < limit {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| Self::io_err(&path, e))?;
            // End of file, or a torn line still being written
            if n == 0 || line.last() != Some(&b'\n') {
                break;
            }
            position += n as u64;
            if n == 1 {
                continue;
            }
            match serde_json::from_slice::<BusEntry>(&line[..n - 1]) {
                Ok(entry) => {
                    resume = Some((entry.seq + 1, position));
                    if entry.seq >= from {
                        entries.push(entry);
                    }
                }
                Err(e) => warn!(topic, "Skipping unreadable bus entry: {}", e),
            }
        }

        if let Some((seq, offset)) = resume {
            self.offsets
                .lock()
                .await
                .entry(topic.to_string())
                .or_default()
                .insert(seq, offset);
        }
        Ok(entries)
    }

    async fn head(&self, topic: &str) -> StateBusResult<Sequence> {
        validate_topic(topic)?;
        if let Some(head) = self.heads.lock().await.get(topic) {
            return Ok(head.next);
        }
        let (entries, _) = self.read_all(topic).await?;
        Ok(entries.last().map(|e| e.seq + 1).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> BusEvent {
        BusEvent::CheckpointWritten {
            checkpoint_id: n as u64,
            tasks: n,
        }
    }

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("status").is_ok());
        assert!(validate_topic("task-7.metrics").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("../etc").is_err());
        assert!(validate_topic("a/b").is_err());
    }

    #[tokio::test]
    async fn test_memory_log_sequences_per_topic() {
        let log = MemoryEventLog::new();
        assert_eq!(log.append("a", event(0)).await.unwrap().seq, 0);
        assert_eq!(log.append("a", event(1)).await.unwrap().seq, 1);
        assert_eq!(log.append("b", event(2)).await.unwrap().seq, 0);
        assert_eq!(log.head("a").await.unwrap(), 2);

        let tail = log.read_from("a", 1, 10).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event, event(1));
    }

    #[tokio::test]
    async fn test_file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path());
        for n in 0..3 {
            log.append("status", event(n)).await.unwrap();
        }

        let reopened = FileEventLog::new(dir.path());
        assert_eq!(reopened.head("status").await.unwrap(), 3);
        let entry = reopened.append("status", event(3)).await.unwrap();
        assert_eq!(entry.seq, 3);

        let all = reopened.read_from("status", 0, 100).await.unwrap();
        let seqs: Vec<Sequence> = all.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_file_log_ignores_and_repairs_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path());
        log.append("status", event(0)).await.unwrap();

        let path = dir.path().join("status.jsonl");
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(br#"{"topic":"status","seq":1,"publ"#);
        tokio::fs::write(&path, &raw).await.unwrap();

        let reopened = FileEventLog::new(dir.path());
        assert_eq!(reopened.read_from("status", 0, 10).await.unwrap().len(), 1);

        let entry = reopened.append("status", event(1)).await.unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(reopened.read_from("status", 0, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_torn_write_behind_cached_head_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path());
        log.append("status", event(0)).await.unwrap();

        // Same process, head already cached, a previous write left half a line
        let path = dir.path().join("status.jsonl");
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(br#"{"topic":"status","seq":1,"publ"#);
        tokio::fs::write(&path, &raw).await.unwrap();

        let entry = log.append("status", event(1)).await.unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(log.head("status").await.unwrap(), 2);

        let seqs: Vec<Sequence> = log
            .read_from("status", 0, 10)
            .await
            .unwrap()
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1]);

        let fresh = FileEventLog::new(dir.path());
        assert_eq!(fresh.read_from("status", 0, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batched_reads_resume_from_recorded_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path());
        for n in 0..150 {
            log.append("metrics", event(n)).await.unwrap();
        }

        let mut from = 0;
        let mut sizes = Vec::new();
        loop {
            let batch = log.read_from("metrics", from, 64).await.unwrap();
            if batch.is_empty() {
                break;
            }
            for (i, entry) in batch.iter().enumerate() {
                assert_eq!(entry.seq, from + i as Sequence);
            }
            sizes.push(batch.len());
            from += batch.len() as Sequence;
        }
        assert_eq!(sizes, vec![64, 64, 22]);

        let known: Vec<Sequence> = log.offsets.lock().await["metrics"].keys().copied().collect();
        assert_eq!(known, vec![64, 128, 150]);

        // Arbitrary starting points still land on the right entry
        let middle = log.read_from("metrics", 100, 3).await.unwrap();
        let seqs: Vec<Sequence> = middle.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![100, 101, 102]);
        let early = log.read_from("metrics", 10, 2).await.unwrap();
        assert_eq!(early[0].seq, 10);
    }
}
