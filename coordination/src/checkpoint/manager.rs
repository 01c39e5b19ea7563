//! Durable checkpoint store
//!
//! ```text
//! <dir>/
//!   checkpoint_00000000000000000001.json
//!   checkpoint_00000000000000000002.json
//!   LATEST                        ← "2"
//! ```
//!
//! Every file is written to a temporary name, synced and renamed into
//! place, so a crash mid-write never damages a published checkpoint. Writes
//! are serialized; reads never take the write lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{validate_checkpoint, Checkpoint, CheckpointId, CheckpointInfo, GlobalState, IntegrityStatus};
use crate::task::Task;

/// Error type for checkpoint operations
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Checkpoint {id} is unreadable: {reason}")]
    Unreadable { id: CheckpointId, reason: String },

    #[error("Checkpoint {id} failed integrity check: {reason}")]
    Corrupt { id: CheckpointId, reason: String },

    #[error("Checkpoint {0} not found")]
    NotFound(CheckpointId),

    #[error("No readable checkpoint available")]
    NoCheckpointAvailable,
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Shared reference to a CheckpointManager
pub type SharedCheckpointManager = Arc<CheckpointManager>;

const FILE_PREFIX: &str = "checkpoint_";
const FILE_SUFFIX: &str = ".json";
const LATEST_FILE: &str = "LATEST";
const TMP_SUFFIX: &str = ".tmp";

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Checkpoint file name for an id
fn file_name(id: CheckpointId) -> String {
    format!("{FILE_PREFIX}{id:020}{FILE_SUFFIX}")
}

/// Parse an id back out of a published checkpoint file name
fn parse_file_name(name: &str) -> Option<CheckpointId> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

/// Checkpoint writer/reader over one directory
pub struct CheckpointManager {
    dir: PathBuf,
    retention: usize,
    write_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn shared(self) -> SharedCheckpointManager {
        Arc::new(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(file_name(id))
    }

    /// Ids of published checkpoints, ascending
    async fn ids(&self) -> CheckpointResult<Vec<CheckpointId>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(io_err(&self.dir)(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.dir))? {
            if let Some(id) = entry.file_name().to_str().and_then(parse_file_name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Id named by the `LATEST` pointer, if it exists and parses
    async fn latest_pointer(&self) -> Option<CheckpointId> {
        let raw = tokio::fs::read_to_string(self.dir.join(LATEST_FILE)).await.ok()?;
        raw.trim().parse().ok()
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> CheckpointResult<()> {
        let final_path = self.dir.join(name);
        let tmp_path = self.dir.join(format!(".{name}{TMP_SUFFIX}"));

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(io_err(&tmp_path))?;
        file.write_all(bytes).await.map_err(io_err(&tmp_path))?;
        file.sync_all().await.map_err(io_err(&tmp_path))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(io_err(&final_path))?;
        Ok(())
    }

    /// Serialize and publish a new checkpoint with the next id.
    pub async fn create_checkpoint(
        &self,
        tasks: &[Task],
        state: &GlobalState,
    ) -> CheckpointResult<CheckpointInfo> {
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;

        let on_disk = self.ids().await?.last().copied().unwrap_or(0);
        let pointer = self.latest_pointer().await.unwrap_or(0);
        let id = on_disk.max(pointer) + 1;

        let checkpoint = Checkpoint::new(id, tasks.to_vec(), state.clone());
        let bytes = serde_json::to_vec_pretty(&checkpoint)?;

        self.write_atomic(&file_name(id), &bytes).await?;
        self.write_atomic(LATEST_FILE, id.to_string().as_bytes())
            .await?;

        info!(
            checkpoint_id = id,
            tasks = tasks.len(),
            bytes = bytes.len(),
            "Checkpoint published"
        );

        if let Err(e) = self.prune_locked(id).await {
            warn!(checkpoint_id = id, "Checkpoint pruning failed: {}", e);
        }

        Ok(CheckpointInfo {
            id,
            timestamp: Some(checkpoint.timestamp),
            task_count: Some(tasks.len()),
            bytes: bytes.len() as u64,
            latest: true,
        })
    }

    /// Load and validate one checkpoint by id.
    pub async fn load_checkpoint(&self, id: CheckpointId) -> CheckpointResult<Checkpoint> {
        let path = self.path_for(id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(id))
            }
            Err(e) => return Err(io_err(&path)(e)),
        };

        let checkpoint: Checkpoint =
            serde_json::from_slice(&raw).map_err(|e| CheckpointError::Unreadable {
                id,
                reason: e.to_string(),
            })?;

        if checkpoint.id != id {
            return Err(CheckpointError::Corrupt {
                id,
                reason: format!("file holds checkpoint {}", checkpoint.id),
            });
        }

        match validate_checkpoint(&checkpoint) {
            IntegrityStatus::Corrupted { errors } => Err(CheckpointError::Corrupt {
                id,
                reason: errors.join("; "),
            }),
            IntegrityStatus::Recoverable { warnings } => {
                warn!(checkpoint_id = id, warnings = ?warnings, "Checkpoint restored with warnings");
                Ok(checkpoint)
            }
            IntegrityStatus::Valid => Ok(checkpoint),
        }
    }

    /// The latest readable checkpoint, falling back to older ones.
    pub async fn restore_from_checkpoint(&self) -> CheckpointResult<Checkpoint> {
        let mut order: Vec<CheckpointId> = Vec::new();
        if let Some(latest) = self.latest_pointer().await {
            order.push(latest);
        }
        for id in self.ids().await?.into_iter().rev() {
            if !order.contains(&id) {
                order.push(id);
            }
        }

        for id in order {
            match self.load_checkpoint(id).await {
                Ok(checkpoint) => {
                    info!(checkpoint_id = id, tasks = checkpoint.tasks.len(), "Checkpoint restored");
                    return Ok(checkpoint);
                }
                Err(e) => warn!(checkpoint_id = id, "Skipping checkpoint: {}", e),
            }
        }

        Err(CheckpointError::NoCheckpointAvailable)
    }

    /// Every published checkpoint, oldest first
    pub async fn list_checkpoints(&self) -> CheckpointResult<Vec<CheckpointInfo>> {
        let latest = self.latest_pointer().await;
        let mut infos = Vec::new();
        for id in self.ids().await? {
            let path = self.path_for(id);
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                // Pruned between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&path)(e)),
            };
            let parsed = serde_json::from_slice::<Checkpoint>(&raw).ok();
            infos.push(CheckpointInfo {
                id,
                timestamp: parsed.as_ref().map(|c| c.timestamp),
                task_count: parsed.as_ref().map(|c| c.tasks.len()),
                bytes: raw.len() as u64,
                latest: latest == Some(id),
            });
        }
        Ok(infos)
    }

    /// Apply the retention policy. Returns how many checkpoints were removed.
    pub async fn prune(&self) -> CheckpointResult<usize> {
        let _guard = self.write_lock.lock().await;
        let latest = self.latest_pointer().await.unwrap_or(0);
        self.prune_locked(latest).await
    }

    async fn prune_locked(&self, latest: CheckpointId) -> CheckpointResult<usize> {
        let ids = self.ids().await?;
        let excess = ids.len().saturating_sub(self.retention);
        let mut removed = 0;

        for id in ids.into_iter().take(excess) {
            if id == latest {
                continue;
            }
            let path = self.path_for(id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(checkpoint_id = id, "Pruned checkpoint");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path)(e)),
            }
        }

        self.remove_stale_temporaries().await;
        Ok(removed)
    }

    /// Leftovers of writes interrupted by a crash
    async fn remove_stale_temporaries(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') && name.ends_with(TMP_SUFFIX) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }
}
