// src/orchestrator.rs

//! The Orchestrator: walks the data root, resolves each leaf folder to a
//! target table and sheet name, drives the Chunk Loader per file, owns the
//! commit boundary, and writes/consumes the pause checkpoint.
//!
//! The state machine is an explicit enum rather than string tags, so every
//! named transition is enforced by `match` exhaustiveness.

use crate::checkpoint::PauseCheckpoint;
use crate::config::Config;
use crate::db::ledger::Ledger;
use crate::error::Result;
use crate::loader::{ChunkLoader, LoadOutcome};
use crate::normalize::table_name_from_path_parts;
use crate::rowsource::has_recognized_extension;
use postgres::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// The state machine driving one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Scanning,
    Processing,
    Paused,
    Finished,
    Checkpointed,
}

/// Tunable run parameters, resolved from the environment.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub sectional_commit: bool,
    pub pause_every: u32,
    pub pause_seconds: u64,
    pub chunk_size: usize,
    pub skip_db: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sectional_commit: false,
            pause_every: 0,
            pause_seconds: 30,
            chunk_size: 10_000,
            skip_db: false,
        }
    }
}

impl RunOptions {
    /// Resolve from the environment, falling back to documented defaults
    /// when a variable is unset or unparsable.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        opts.sectional_commit = std::env::var("ETL_SECTIONAL_COMMIT")
            .map(|v| v == "1")
            .unwrap_or(false);
        opts.pause_every = std::env::var("ETL_PAUSE_EVERY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        opts.pause_seconds = std::env::var("ETL_PAUSE_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        opts.chunk_size = std::env::var("ETL_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);
        opts.skip_db = std::env::var("SKIP_DB").map(|v| v == "1").unwrap_or(false);
        opts
    }
}

/// Outcome of a single file within the run summary.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Imported { rows: u64 },
    Skipped,
    ReadError(String),
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files: Vec<(PathBuf, FileOutcome)>,
    pub checkpointed: bool,
}

/// Groups workbook files by leaf folder: a leaf folder's path-parts tuple
/// relative to the data root, sorted by folder then by file name. Folders
/// are processed in sorted path order; within a folder, files in sorted
/// name order.
fn scan_leaf_folders(data_root: &Path) -> BTreeMap<Vec<String>, Vec<PathBuf>> {
    let mut folders: BTreeMap<Vec<String>, Vec<PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(data_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if !has_recognized_extension(entry.path()) {
            continue;
        }

        let parent = entry.path().parent().unwrap_or(data_root);
        let relative = parent.strip_prefix(data_root).unwrap_or(parent);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();

        folders.entry(parts).or_default().push(entry.path().to_path_buf());
    }

    for files in folders.values_mut() {
        files.sort();
    }

    folders
}

/// Cooperative cancellation flag, installed once per process via
/// [`Orchestrator::install_cancellation_handler`].
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator<'a> {
    client: &'a mut Client,
    config: Config,
    options: RunOptions,
    cancellation: CancellationToken,
    state: OrchestratorState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a mut Client, config: Config, options: RunOptions, cancellation: CancellationToken) -> Self {
        Self {
            client,
            config,
            options,
            cancellation,
            state: OrchestratorState::Idle,
        }
    }

    /// Install a SIGINT/SIGTERM handler that flips a [`CancellationToken`]
    /// the orchestrator polls at file boundaries. Call once per process.
    pub fn install_cancellation_handler() -> Result<CancellationToken> {
        let token = CancellationToken::new();
        let flag = token.clone();
        ctrlc::set_handler(move || flag.cancel())
            .map_err(|e| crate::error::Error::Config(format!("failed to install signal handler: {e}")))?;
        Ok(token)
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run a fresh import over `data_root`. If a checkpoint already exists
    /// there, callers should use [`Orchestrator::resume`] instead.
    pub fn run(&mut self, data_root: &Path) -> Result<RunSummary> {
        self.state = OrchestratorState::Scanning;
        Ledger::migrate(self.client)?;

        let folders = scan_leaf_folders(data_root);
        let folder_order: Vec<Vec<String>> = folders.keys().cloned().collect();
        self.drive(data_root, &folders, &folder_order, None)
    }

    /// Resume a previously checkpointed run: only the folders/files named in
    /// the checkpoint are (re)attempted.
    pub fn resume(&mut self, data_root: &Path) -> Result<RunSummary> {
        let Some(checkpoint) = PauseCheckpoint::load(data_root)? else {
            return self.run(data_root);
        };

        self.state = OrchestratorState::Scanning;
        Ledger::migrate(self.client)?;

        let all_folders = scan_leaf_folders(data_root);
        let remaining_parts: Vec<Vec<String>> = checkpoint
            .remaining_folders
            .iter()
            .map(|p| path_to_parts(p))
            .collect();

        let mut folders: BTreeMap<Vec<String>, Vec<PathBuf>> = BTreeMap::new();
        for parts in &remaining_parts {
            if let Some(files) = all_folders.get(parts) {
                folders.insert(parts.clone(), files.clone());
            }
        }

        let current_folder_files: Option<Vec<PathBuf>> = if checkpoint.remaining_files_in_current_folder.is_empty() {
            None
        } else {
            Some(checkpoint.remaining_files_in_current_folder.clone())
        };

        self.drive(data_root, &folders, &remaining_parts, current_folder_files)
    }

    fn drive(
        &mut self,
        data_root: &Path,
        folders: &BTreeMap<Vec<String>, Vec<PathBuf>>,
        folder_order: &[Vec<String>],
        resume_files: Option<Vec<PathBuf>>,
    ) -> Result<RunSummary> {
        self.state = OrchestratorState::Processing;
        let mut summary = RunSummary::default();
        let mut files_since_pause: u32 = 0;
        let mut resume_files = resume_files;

        for (idx, parts) in folder_order.iter().enumerate() {
            let Some(all_files) = folders.get(parts) else { continue };
            let files: Vec<PathBuf> = match resume_files.take() {
                Some(remaining) => remaining,
                None => all_files.clone(),
            };

            let table_name = table_name_from_path_parts(parts);
            let sheet_name = self.config.resolve_sheet(parts);

            for (file_idx, file) in files.iter().enumerate() {
                if self.cancellation.is_cancelled() {
                    let remaining_folders: Vec<PathBuf> =
                        folder_order[idx..].iter().map(|p| PathBuf::from(p.join("/"))).collect();
                    let remaining_files = files[file_idx..].to_vec();
                    self.checkpoint_and_stop(data_root, remaining_folders, remaining_files)?;
                    summary.checkpointed = true;
                    return Ok(summary);
                }

                let outcome = self.import_one_file(&table_name, &sheet_name, file, data_root, idx, folder_order, &files[file_idx..], &mut summary)?;
                if let Some(stop_summary) = outcome {
                    return Ok(stop_summary);
                }

                files_since_pause += 1;
                if self.options.pause_every > 0 && files_since_pause >= self.options.pause_every {
                    self.pause(data_root, idx, folder_order, &files[file_idx + 1..])?;
                    files_since_pause = 0;
                }
            }

            if self.options.sectional_commit {
                tracing::info!(table = %table_name, "sectional commit at folder boundary");
            }
        }

        self.state = OrchestratorState::Finished;
        PauseCheckpoint::delete(data_root)?;
        Ok(summary)
    }

    /// Import one file; returns `Ok(Some(summary))` only when a fatal,
    /// whole-run error forced an early checkpointed stop.
    #[allow(clippy::too_many_arguments)]
    fn import_one_file(
        &mut self,
        table_name: &str,
        sheet_name: &str,
        file: &Path,
        data_root: &Path,
        folder_idx: usize,
        folder_order: &[Vec<String>],
        remaining_in_folder: &[PathBuf],
        summary: &mut RunSummary,
    ) -> Result<Option<RunSummary>> {
        if self.options.skip_db {
            tracing::info!(file = %file.display(), "SKIP_DB set, not writing");
            summary.files.push((file.to_path_buf(), FileOutcome::Skipped));
            return Ok(None);
        }

        let mut loader = ChunkLoader::new(self.client);
        match loader.load_file(table_name, sheet_name, file, self.options.chunk_size) {
            Ok(LoadOutcome::Imported { rows }) => {
                tracing::info!(file = %file.display(), table = table_name, rows, "imported");
                summary.files.push((file.to_path_buf(), FileOutcome::Imported { rows }));
                Ok(None)
            }
            Ok(LoadOutcome::Skipped) => {
                summary.files.push((file.to_path_buf(), FileOutcome::Skipped));
                Ok(None)
            }
            Err(crate::error::Error::Read { path, modern, legacy }) => {
                tracing::warn!(file = %path, modern, legacy, "unreadable workbook, skipping");
                summary.files.push((
                    file.to_path_buf(),
                    FileOutcome::ReadError(format!("modern: {modern}; legacy: {legacy}")),
                ));
                if self.options.sectional_commit {
                    let remaining_folders: Vec<PathBuf> =
                        folder_order[folder_idx..].iter().map(|p| PathBuf::from(p.join("/"))).collect();
                    self.checkpoint_and_stop(data_root, remaining_folders, remaining_in_folder[1..].to_vec())?;
                    summary.checkpointed = true;
                    return Ok(Some(summary.clone()));
                }
                Ok(None)
            }
            Err(crate::error::Error::Connection(e)) => {
                tracing::error!(error = %e, "connection error, stopping run");
                let remaining_folders: Vec<PathBuf> =
                    folder_order[folder_idx..].iter().map(|p| PathBuf::from(p.join("/"))).collect();
                self.checkpoint_and_stop(data_root, remaining_folders, remaining_in_folder.to_vec())?;
                summary.checkpointed = true;
                Ok(Some(summary.clone()))
            }
            Err(other) => {
                // Schema/Integrity failures are fatal for this file only:
                // skip and continue unless sectional-commit is on.
                tracing::error!(file = %file.display(), error = %other, "file import aborted");
                if self.options.sectional_commit {
                    let remaining_folders: Vec<PathBuf> =
                        folder_order[folder_idx..].iter().map(|p| PathBuf::from(p.join("/"))).collect();
                    self.checkpoint_and_stop(data_root, remaining_folders, remaining_in_folder[1..].to_vec())?;
                    summary.checkpointed = true;
                    return Ok(Some(summary.clone()));
                }
                Ok(None)
            }
        }
    }

    fn pause(
        &mut self,
        data_root: &Path,
        folder_idx: usize,
        folder_order: &[Vec<String>],
        remaining_in_folder: &[PathBuf],
    ) -> Result<()> {
        self.state = OrchestratorState::Paused;
        tracing::info!(seconds = self.options.pause_seconds, "pausing between files");

        if self.options.sectional_commit {
            let remaining_folders: Vec<PathBuf> =
                folder_order[folder_idx..].iter().map(|p| PathBuf::from(p.join("/"))).collect();
            PauseCheckpoint::new(data_root.to_path_buf(), remaining_folders, remaining_in_folder.to_vec())
                .write(data_root)?;
        }

        std::thread::sleep(Duration::from_secs(self.options.pause_seconds));
        self.state = OrchestratorState::Processing;
        Ok(())
    }

    fn checkpoint_and_stop(
        &mut self,
        data_root: &Path,
        remaining_folders: Vec<PathBuf>,
        remaining_files: Vec<PathBuf>,
    ) -> Result<()> {
        self.state = OrchestratorState::Checkpointed;
        let checkpoint = PauseCheckpoint::new(data_root.to_path_buf(), remaining_folders, remaining_files);
        checkpoint.write(data_root)
    }
}

fn path_to_parts(path: &Path) -> Vec<String> {
    path.to_string_lossy().split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_leaf_folders_groups_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sales/2024")).unwrap();
        std::fs::write(dir.path().join("sales/2024/q2.xlsx"), b"x").unwrap();
        std::fs::write(dir.path().join("sales/2024/q1.xlsx"), b"x").unwrap();
        std::fs::write(dir.path().join("sales/2024/notes.txt"), b"x").unwrap();

        let folders = scan_leaf_folders(dir.path());
        let key = vec!["sales".to_string(), "2024".to_string()];
        let files = folders.get(&key).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("q1.xlsx"));
        assert!(files[1].ends_with("q2.xlsx"));
    }

    #[test]
    fn cancellation_token_reflects_cancel() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
