use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};
use crate::models::{EntryUpdate, PaperStatus, ProgressEntry, RunProgress};
use crate::storage::atomic::write_json_atomic;

/// Durable per-run progress, flushed to `progress.json` after every mutation.
///
/// There is at most one active run per store. A run is bootstrapped with
/// [`start_new_run`](Self::start_new_run) or picked up again with
/// [`load_existing_run`](Self::load_existing_run).
pub struct ProgressStore {
    path: PathBuf,
    archive_dir: PathBuf,
    state: Mutex<Option<RunProgress>>,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive_dir: archive_dir.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace any in-memory run with a fresh one and persist it.
    pub fn start_new_run(&self, keywords: Vec<String>, total_papers: usize) -> Result<RunProgress> {
        let run = RunProgress::new(keywords, total_papers);
        let mut state = self.lock();
        write_json_atomic(&self.path, &run)?;
        info!(run_id = %run.run_id, total_papers, "started new run");
        *state = Some(run.clone());
        Ok(run)
    }

    /// Read `progress.json` from disk and make it the active run.
    ///
    /// Returns `Ok(None)` when no progress file exists.
    pub fn load_existing_run(&self) -> Result<Option<RunProgress>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let run: RunProgress =
            serde_json::from_str(&contents).map_err(|e| CoreError::CorruptState {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        debug!(
            run_id = %run.run_id,
            entries = run.entries.len(),
            completed = run.completed_summaries(),
            "loaded existing run"
        );
        *self.lock() = Some(run.clone());
        Ok(Some(run))
    }

    /// Register a downloaded paper. Existing entries keep their status.
    pub fn add_paper(&self, citation_key: &str, pdf_path: &str) -> Result<()> {
        let mut state = self.lock();
        let run = state.as_mut().ok_or(CoreError::NoActiveRun)?;

        match run.entries.get_mut(citation_key) {
            Some(entry) => {
                if entry.pdf_path != pdf_path {
                    entry.pdf_path = pdf_path.to_string();
                    entry.updated_at = Utc::now();
                }
            }
            None => {
                run.entries.insert(
                    citation_key.to_string(),
                    ProgressEntry::new(citation_key, pdf_path),
                );
            }
        }
        if run.entries.len() > run.total_papers {
            run.total_papers = run.entries.len();
        }
        run.updated_at = Utc::now();
        self.flush(run);
        Ok(())
    }

    /// Move `citation_key` to `status`, applying the optional fields in `update`.
    ///
    /// Rejects transitions the status lifecycle does not allow. A failed flush is
    /// logged and the in-memory state stays authoritative.
    pub fn update_entry_status(
        &self,
        citation_key: &str,
        status: PaperStatus,
        update: EntryUpdate,
    ) -> Result<()> {
        let mut state = self.lock();
        let run = state.as_mut().ok_or(CoreError::NoActiveRun)?;
        let entry = run
            .entries
            .get_mut(citation_key)
            .ok_or_else(|| CoreError::PaperNotFound(citation_key.to_string()))?;

        if !entry.status.can_transition_to(status) {
            return Err(CoreError::InvalidTransition {
                key: citation_key.to_string(),
                from: entry.status,
                to: status,
            });
        }

        entry.status = status;
        if let Some(path) = update.summary_path {
            entry.summary_path = Some(path);
        }
        if let Some(attempts) = update.summary_attempts {
            entry.summary_attempts = attempts;
        }
        if let Some(elapsed) = update.summary_time {
            entry.summary_time = elapsed;
        }
        if let Some(elapsed) = update.download_time {
            entry.download_time = Some(elapsed);
        }
        match update.last_error {
            Some(message) => entry.last_error = Some(message),
            None if status == PaperStatus::Summarized => entry.last_error = None,
            None => {}
        }
        entry.updated_at = Utc::now();
        run.updated_at = entry.updated_at;

        debug!(citation_key, status = %status, "progress updated");
        self.flush(run);
        Ok(())
    }

    /// Force a write of the active run.
    pub fn save_progress(&self) -> Result<()> {
        let state = self.lock();
        let run = state.as_ref().ok_or(CoreError::NoActiveRun)?;
        write_json_atomic(&self.path, run)
    }

    /// Move `progress.json` into the archive directory and clear the active run.
    ///
    /// Returns the archived path, or `None` when there was nothing to archive.
    pub fn archive_progress(&self) -> Result<Option<PathBuf>> {
        let mut state = self.lock();
        *state = None;
        if !self.path.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.archive_dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let mut target = self.archive_dir.join(format!("progress_{stamp}.json"));
        let mut n = 2;
        while target.exists() {
            target = self.archive_dir.join(format!("progress_{stamp}_{n}.json"));
            n += 1;
        }
        fs::rename(&self.path, &target)?;
        info!(archived = %target.display(), "archived previous run");
        Ok(Some(target))
    }

    /// Whether the active run tracks `citation_key`.
    pub fn contains(&self, citation_key: &str) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|run| run.entries.contains_key(citation_key))
    }

    /// Copy of the active run, if any.
    pub fn snapshot(&self) -> Option<RunProgress> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunProgress>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, run: &RunProgress) {
        if let Err(e) = write_json_atomic(&self.path, run) {
            error!(path = %self.path.display(), error = %e, "failed to persist progress");
            warn!("continuing with in-memory progress; it will be retried on next update");
        }
    }
}
