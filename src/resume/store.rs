//! Resume store bound to a directory

use super::checkpoint::CollectionCheckpoint;
use super::state::{ResumeError, ResumeState};
use crate::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the state inside the resume directory
pub const STATE_FILE_NAME: &str = "inat_resume.json";

/// Resume state plus the file it is saved to
#[derive(Debug)]
pub struct ResumeStore {
    path: PathBuf,
    state: ResumeState,
}

impl ResumeStore {
    /// Open the store in `dir`, loading existing state when present
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ResumeError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let path = Self::state_path(dir);
        let state = if path.exists() {
            ResumeState::load(&path)?
        } else {
            debug!(path = %path.display(), "No resume state found, starting fresh");
            ResumeState::new()
        };

        Ok(Self { path, state })
    }

    /// Delete the state file in `dir`. Returns whether one existed.
    pub fn reset(dir: impl AsRef<Path>) -> Result<bool, ResumeError> {
        let path = Self::state_path(dir.as_ref());
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        info!(path = %path.display(), "Resume state removed");
        Ok(true)
    }

    /// `<dir>/inat_resume.json`
    pub fn state_path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE_NAME)
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loaded state
    pub fn state(&self) -> &ResumeState {
        &self.state
    }

    /// Effective start cursor: the larger of the requested and persisted one
    pub fn start_cursor(&self, collection_key: &str, requested: Cursor) -> Cursor {
        match self.state.cursor(collection_key) {
            Some(persisted) if persisted > requested => {
                info!(
                    collection = collection_key,
                    requested = %requested,
                    persisted = %persisted,
                    "Resuming above persisted cursor"
                );
                persisted
            }
            _ => requested,
        }
    }

    /// Record a checkpoint and write the state out
    pub fn commit(
        &mut self,
        collection_key: &str,
        checkpoint: CollectionCheckpoint,
    ) -> Result<(), ResumeError> {
        if self.state.record_checkpoint(collection_key, checkpoint) {
            self.state.save(&self.path)?;
        }
        Ok(())
    }
}
