// src/checkpoint.rs

//! The pause checkpoint: a small persistent record written when the
//! orchestrator stops mid-run, and consumed to resume exactly where it
//! left off. Written atomically (temp file, fsync, rename) so a crash
//! mid-write never leaves a half-written checkpoint behind.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default checkpoint file name, written inside the data root.
pub const CHECKPOINT_FILE_NAME: &str = ".etl_pause";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PauseCheckpoint {
    pub data_root: PathBuf,
    pub remaining_folders: Vec<PathBuf>,
    pub remaining_files_in_current_folder: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl PauseCheckpoint {
    pub fn new(
        data_root: PathBuf,
        remaining_folders: Vec<PathBuf>,
        remaining_files_in_current_folder: Vec<PathBuf>,
    ) -> Self {
        Self {
            data_root,
            remaining_folders,
            remaining_files_in_current_folder,
            created_at: Utc::now(),
        }
    }

    /// Where the checkpoint for `data_root` lives: `data_root/.etl_pause`.
    pub fn path_for(data_root: &Path) -> PathBuf {
        data_root.join(CHECKPOINT_FILE_NAME)
    }

    pub fn exists(data_root: &Path) -> bool {
        Self::path_for(data_root).exists()
    }

    /// Write the checkpoint atomically: serialize to a temp file in the
    /// same directory, fsync it, then rename over the final path.
    pub fn write(&self, data_root: &Path) -> Result<()> {
        let final_path = Self::path_for(data_root);
        let json = serde_json::to_vec_pretty(self).expect("checkpoint is always serializable");

        let mut tmp = tempfile::NamedTempFile::new_in(data_root)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&final_path).map_err(|e| e.error)?;

        tracing::info!(path = %final_path.display(), "wrote pause checkpoint");
        Ok(())
    }

    /// Load the checkpoint for `data_root`, if one exists.
    pub fn load(data_root: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(data_root);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let checkpoint: Self = serde_json::from_str(&text)
            .map_err(|e| crate::error::Error::Config(format!("invalid checkpoint at {}: {e}", path.display())))?;
        Ok(Some(checkpoint))
    }

    /// Delete the checkpoint file; called when a resumed run finishes cleanly.
    pub fn delete(data_root: &Path) -> Result<()> {
        let path = Self::path_for(data_root);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = PauseCheckpoint::new(
            dir.path().to_path_buf(),
            vec![PathBuf::from("hr/payroll")],
            vec![PathBuf::from("q2.xlsx"), PathBuf::from("q3.xlsx")],
        );

        checkpoint.write(dir.path()).unwrap();
        assert!(PauseCheckpoint::exists(dir.path()));

        let loaded = PauseCheckpoint::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.remaining_folders, checkpoint.remaining_folders);
        assert_eq!(
            loaded.remaining_files_in_current_folder,
            checkpoint.remaining_files_in_current_folder
        );

        PauseCheckpoint::delete(dir.path()).unwrap();
        assert!(!PauseCheckpoint::exists(dir.path()));
    }

    #[test]
    fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PauseCheckpoint::load(dir.path()).unwrap().is_none());
    }
}
