//! Resume state persistence
//!
//! Atomic file writes and schema versioning for the per-collection cursor map.

use super::checkpoint::CollectionCheckpoint;
use crate::Cursor;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: &str = "1.0.0";

/// Larger state files are rejected unread (10 MB)
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Cursor map for every collection a results directory has seen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    schema_version: String,
    collections: BTreeMap<String, CollectionCheckpoint>,
    metadata: StateMetadata,
    created_at: i64,
    updated_at: i64,
}

impl ResumeState {
    /// Create an empty state
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            collections: BTreeMap::new(),
            metadata: StateMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// All checkpoints, keyed by collection
    pub fn collections(&self) -> &BTreeMap<String, CollectionCheckpoint> {
        &self.collections
    }

    /// Checkpoint of one collection
    pub fn checkpoint(&self, collection_key: &str) -> Option<&CollectionCheckpoint> {
        self.collections.get(collection_key)
    }

    /// Persisted cursor of one collection
    pub fn cursor(&self, collection_key: &str) -> Option<Cursor> {
        self.checkpoint(collection_key).map(CollectionCheckpoint::cursor)
    }

    /// Get the metadata
    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    /// Last update (Unix milliseconds)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Record a checkpoint.
    ///
    /// Cursors never move backwards: a checkpoint below the stored one is
    /// ignored and `false` is returned.
    pub fn record_checkpoint(&mut self, collection_key: &str, checkpoint: CollectionCheckpoint) -> bool {
        if let Some(existing) = self.collections.get(collection_key) {
            if checkpoint.cursor() < existing.cursor() {
                warn!(
                    collection = collection_key,
                    stored = %existing.cursor(),
                    offered = %checkpoint.cursor(),
                    "Ignoring checkpoint below the stored cursor"
                );
                return false;
            }
        }

        self.metadata.total_checkpoints += 1;
        debug!(
            collection = collection_key,
            cursor = %checkpoint.cursor(),
            total_checkpoints = self.metadata.total_checkpoints,
            "Checkpoint recorded"
        );

        self.collections.insert(collection_key.to_string(), checkpoint);
        self.updated_at = chrono::Utc::now().timestamp_millis();
        true
    }

    /// Only files written by this schema version are accepted
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version == SCHEMA_VERSION {
            return Ok(());
        }
        Err(ResumeError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: self.schema_version.clone(),
        })
    }

    /// Write the state to `path`: serialize, take the exclusive lock, then
    /// replace the file through a synced temp file in the same directory.
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(io_error("create state directory"))?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let mut lock = lock_for(path)?;
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("exclusive lock on {}: {e}", path.display())))?;

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(io_error("stage state file"))?;
        staged.write_all(&json).map_err(io_error("write staged state"))?;
        staged.as_file().sync_all().map_err(io_error("sync staged state"))?;
        staged
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("replace {}: {}", path.display(), e.error)))?;

        // Make the rename itself durable; not every platform allows this
        if let Ok(handle) = std::fs::File::open(dir) {
            let _ = handle.sync_all();
        }

        debug!(
            path = %path.display(),
            collections = self.collections.len(),
            bytes = json.len(),
            "Resume state written"
        );
        Ok(())
    }

    /// Read the state at `path` under a shared lock.
    ///
    /// Oversized, unparsable and foreign-version files are errors; the caller
    /// decides whether to reset.
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        let lock = lock_for(path)?;
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("shared lock on {}: {e}", path.display())))?;

        let size = std::fs::metadata(path).map_err(io_error("stat state file"))?.len();
        if size > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size,
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let raw = std::fs::read(path).map_err(io_error("read state file"))?;
        let state: ResumeState = serde_json::from_slice(&raw).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Resume state is not valid JSON");
            ResumeError::DeserializationError(e.to_string())
        })?;
        state.validate_schema_version()?;

        info!(
            path = %path.display(),
            collections = state.collections.len(),
            "Resume state loaded"
        );
        Ok(state)
    }
}

/// Advisory lock file kept next to the state file
fn lock_for(path: &Path) -> Result<RwLock<File>, ResumeError> {
    let lock_path = path.with_extension("lock");
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map(RwLock::new)
        .map_err(|e| ResumeError::LockError(format!("open {}: {e}", lock_path.display())))
}

fn io_error(action: &'static str) -> impl Fn(std::io::Error) -> ResumeError {
    move |e| ResumeError::IoError(format!("{action}: {e}"))
}

impl Default for ResumeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Bookkeeping stored alongside the cursors
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateMetadata {
    total_checkpoints: u64,
}

impl StateMetadata {
    /// Checkpoints recorded since the state was created
    pub fn total_checkpoints(&self) -> u64 {
        self.total_checkpoints
    }
}

/// Resume state failures
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("resume state has schema {found}, this build reads {expected}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("resume state is {size} bytes, limit is {max}")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("resume state I/O: {0}")]
    IoError(String),

    /// Serialization error
    #[error("cannot encode resume state: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("cannot decode resume state: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("resume state lock: {0}")]
    LockError(String),
}
