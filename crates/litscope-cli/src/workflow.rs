//! Top-level sequencing: search, download, resume check, summarize.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::{StreamExt, future, stream};
use litscope_ai::{LanguageModel, PaperRef, SummarizationResult, SummarizationScheduler};
use litscope_core::{
    EntryUpdate, ExitCode, LibraryIndex, PaperStatus, ProgressStore, RunProgress, SearchResult,
};
use litscope_science::download::relative_pdf_path;
use litscope_science::{DownloadManager, DownloadResult, SearchAggregator};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What to do with an unfinished run found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    #[default]
    Resume,
    /// Archive the unfinished run and start over.
    Fresh,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub keywords: Vec<String>,
    pub limit_per_keyword: usize,
    pub download_workers: usize,
    pub summarize_workers: usize,
    pub resume: ResumePolicy,
    /// Give papers that failed in the resumed run another attempt.
    pub retry_failed: bool,
}

/// Aggregated statistics of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowResult {
    pub keywords: Vec<String>,
    pub resumed: bool,
    pub papers_found: usize,
    pub papers_downloaded: usize,
    pub papers_failed_download: usize,
    pub papers_already_existed: usize,
    pub papers_newly_downloaded: usize,
    pub summaries_generated: usize,
    pub summaries_failed: usize,
    pub summaries_skipped: usize,
    /// Seconds.
    pub total_time: f64,
    pub download_results: Vec<DownloadResult>,
    pub summarization_results: Vec<SummarizationResult>,
    pub progress: Option<RunProgress>,
}

impl WorkflowResult {
    fn empty(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.to_vec(),
            ..Default::default()
        }
    }

    fn record_downloads(&mut self, results: Vec<DownloadResult>) {
        for r in &results {
            match (r.success, r.already_existed) {
                (true, true) => self.papers_already_existed += 1,
                (true, false) => self.papers_newly_downloaded += 1,
                (false, _) => self.papers_failed_download += 1,
            }
        }
        self.papers_downloaded = self.papers_already_existed + self.papers_newly_downloaded;
        self.download_results = results;
    }

    fn record_summaries(&mut self, results: Vec<SummarizationResult>) {
        for r in &results {
            match (r.success, r.skipped) {
                (true, true) => self.summaries_skipped += 1,
                (true, false) => self.summaries_generated += 1,
                (false, _) => self.summaries_failed += 1,
            }
        }
        self.summarization_results = results;
    }

    /// 0 on forward progress, 2 when nothing was found, 1 when nothing worked.
    pub fn exit_code(&self) -> ExitCode {
        if self.papers_found == 0 && !self.resumed {
            ExitCode::NothingToDo
        } else if self.summaries_generated + self.summaries_skipped + self.papers_newly_downloaded > 0 {
            ExitCode::Success
        } else {
            ExitCode::GeneralError
        }
    }
}

/// Outcome of `cleanup`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed_entries: Vec<String>,
    pub removed_temp_files: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed_entries.is_empty() && self.removed_temp_files.is_empty()
    }
}

/// Sequences the pipeline. Every collaborator is passed in explicitly.
pub struct WorkflowOrchestrator {
    aggregator: Arc<SearchAggregator>,
    library: Arc<LibraryIndex>,
    downloads: Arc<DownloadManager>,
    progress: Arc<ProgressStore>,
    scheduler: Arc<SummarizationScheduler>,
    llm: Arc<dyn LanguageModel>,
    data_dir: PathBuf,
    shutdown: Option<watch::Receiver<bool>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        aggregator: Arc<SearchAggregator>,
        library: Arc<LibraryIndex>,
        downloads: Arc<DownloadManager>,
        progress: Arc<ProgressStore>,
        scheduler: Arc<SummarizationScheduler>,
        llm: Arc<dyn LanguageModel>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            aggregator,
            library,
            downloads,
            progress,
            scheduler,
            llm,
            data_dir: data_dir.into(),
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// An unfinished run on disk, if any.
    pub fn pending_run(&self) -> Result<Option<RunProgress>> {
        let run = self.progress.load_existing_run()?;
        Ok(run.filter(|r| !r.is_complete()))
    }

    /// Full pipeline.
    ///
    /// Aborts with an error only when the LLM service is unreachable or
    /// persisted state is unusable. Everything else ends in a result, possibly
    /// a zero-result one.
    pub async fn run(&self, options: &RunOptions) -> Result<WorkflowResult> {
        let started = Instant::now();
        self.llm
            .health_check()
            .await
            .with_context(|| format!("LLM model '{}' is not reachable", self.llm.model_name()))?;

        let mut result = match self.prepare_run(options)? {
            Some(run) => self.resume(run, options).await?,
            None => self.fresh_run(options).await?,
        };

        if let Err(e) = self.progress.save_progress() {
            warn!(error = %e, "final progress save failed");
        }
        result.progress = self.progress.snapshot();
        result.total_time = started.elapsed().as_secs_f64();
        info!(
            found = result.papers_found,
            downloaded = result.papers_downloaded,
            summarized = result.summaries_generated,
            skipped = result.summaries_skipped,
            failed = result.summaries_failed,
            elapsed_secs = result.total_time,
            "workflow finished"
        );
        Ok(result)
    }

    /// Returns the run to resume, archiving a stale one otherwise.
    fn prepare_run(&self, options: &RunOptions) -> Result<Option<RunProgress>> {
        let Some(run) = self.progress.load_existing_run()? else {
            return Ok(None);
        };

        let same_keywords = options.keywords.is_empty() || same_keywords(&run.keywords, &options.keywords);
        let unfinished = !run.is_complete() || (options.retry_failed && run.failed() > 0);
        if unfinished && same_keywords && options.resume == ResumePolicy::Resume {
            info!(
                run_id = %run.run_id,
                completed = run.completed_summaries(),
                total = run.total_papers,
                "resuming unfinished run"
            );
            return Ok(Some(run));
        }

        self.progress.archive_progress()?;
        Ok(None)
    }

    /// Continue a run without searching again: papers come from the progress
    /// file and their PDFs from the library. Failed papers stay failed unless
    /// `retry_failed` is set.
    async fn resume(&self, run: RunProgress, options: &RunOptions) -> Result<WorkflowResult> {
        let mut result = WorkflowResult::empty(&run.keywords);
        result.resumed = true;
        result.papers_found = run.total_papers;

        let mut papers = Vec::new();
        for entry in run.entries.values() {
            if entry.status == PaperStatus::Failed && !options.retry_failed {
                debug!(citation_key = %entry.citation_key, "failed earlier in this run, not retried");
                continue;
            }
            let pdf_path = self.data_dir.join(&entry.pdf_path);
            if !pdf_path.exists() {
                warn!(citation_key = %entry.citation_key, path = %pdf_path.display(), "PDF missing, skipped on resume");
                continue;
            }
            result.papers_already_existed += 1;
            let title = self
                .library
                .get(&entry.citation_key)
                .map(|e| e.title)
                .unwrap_or_else(|| entry.citation_key.clone());
            papers.push(PaperRef {
                citation_key: entry.citation_key.clone(),
                title,
                pdf_path,
            });
        }
        result.papers_downloaded = result.papers_already_existed;

        let summaries = self
            .scheduler
            .summarize_all(&papers, options.summarize_workers)
            .await;
        result.record_summaries(summaries);
        Ok(result)
    }

    async fn fresh_run(&self, options: &RunOptions) -> Result<WorkflowResult> {
        let mut result = WorkflowResult::empty(&options.keywords);

        let found = self
            .aggregator
            .search(&options.keywords, options.limit_per_keyword)
            .await;
        result.papers_found = found.len();
        if found.is_empty() {
            info!("no papers found, nothing to do");
            return Ok(result);
        }

        let downloads = self.download_all(&found, options.download_workers).await?;
        result.record_downloads(downloads);
        if result.papers_downloaded == 0 {
            warn!(found = result.papers_found, "no PDFs could be downloaded");
            return Ok(result);
        }

        let papers = self.bootstrap_progress(&options.keywords, &result.download_results)?;
        let summaries = self
            .scheduler
            .summarize_all(&papers, options.summarize_workers)
            .await;
        result.record_summaries(summaries);
        Ok(result)
    }

    /// Register every search result and download PDFs with bounded parallelism.
    pub async fn download_all(
        &self,
        results: &[SearchResult],
        workers: usize,
    ) -> Result<Vec<DownloadResult>> {
        let shutdown = self.shutdown.clone();
        let outcomes: Vec<_> = stream::iter(results)
            .take_while(move |_| future::ready(!is_set(shutdown.as_ref())))
            .map(|r| self.downloads.download_paper(r))
            .buffer_unordered(workers.max(1))
            .collect()
            .await;

        let downloads = outcomes
            .into_iter()
            .collect::<litscope_science::Result<Vec<_>>>()
            .context("library update failed during download")?;
        info!(
            total = downloads.len(),
            succeeded = downloads.iter().filter(|d| d.success).count(),
            "downloads finished"
        );
        Ok(downloads)
    }

    fn bootstrap_progress(
        &self,
        keywords: &[String],
        downloads: &[DownloadResult],
    ) -> Result<Vec<PaperRef>> {
        let succeeded: Vec<&DownloadResult> = downloads.iter().filter(|d| d.success).collect();
        self.progress.start_new_run(keywords.to_vec(), succeeded.len())?;

        let mut papers = Vec::with_capacity(succeeded.len());
        for d in succeeded {
            let Some(pdf_path) = &d.pdf_path else { continue };
            self.progress
                .add_paper(&d.citation_key, &relative_pdf_path(&d.citation_key))?;
            if !d.already_existed {
                self.progress.update_entry_status(
                    &d.citation_key,
                    PaperStatus::Downloaded,
                    EntryUpdate {
                        download_time: Some(d.download_time),
                        ..Default::default()
                    },
                )?;
            }
            papers.push(PaperRef {
                citation_key: d.citation_key.clone(),
                title: d.title.clone(),
                pdf_path: pdf_path.clone(),
            });
        }
        Ok(papers)
    }

    // ─── Single-stage operations ──────────────────────────────────────────

    /// Search and register the results in the library, without downloading.
    pub async fn search(&self, keywords: &[String], limit: usize) -> Result<Vec<(String, SearchResult)>> {
        let found = self.aggregator.search(keywords, limit).await;
        let mut out = Vec::with_capacity(found.len());
        for r in found {
            let outcome = self.library.add_or_update(&r)?;
            out.push((outcome.citation_key, r));
        }
        Ok(out)
    }

    /// Download PDFs for library entries that have none yet.
    pub async fn download_missing(&self, workers: usize) -> Result<Vec<DownloadResult>> {
        let missing = self.library.get_entries_without_pdf();
        let shutdown = self.shutdown.clone();
        let outcomes: Vec<_> = stream::iter(missing)
            .take_while(move |_| future::ready(!is_set(shutdown.as_ref())))
            .map(|entry| async move {
                let result = entry.to_search_result();
                self.downloads.download_for_key(&entry.citation_key, &result).await
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await;
        Ok(outcomes
            .into_iter()
            .collect::<litscope_science::Result<Vec<_>>>()?)
    }

    /// Summarize every library entry with a PDF, tracking progress in the
    /// current run (a new one is started when none exists).
    pub async fn summarize_library(&self, workers: usize) -> Result<Vec<SummarizationResult>> {
        let papers: Vec<PaperRef> = self
            .library
            .list_entries()
            .into_iter()
            .filter_map(|e| {
                let rel = e.pdf_path?;
                Some(PaperRef {
                    pdf_path: self.data_dir.join(rel),
                    citation_key: e.citation_key,
                    title: e.title,
                })
            })
            .collect();
        if papers.is_empty() {
            return Ok(Vec::new());
        }

        self.llm
            .health_check()
            .await
            .with_context(|| format!("LLM model '{}' is not reachable", self.llm.model_name()))?;
        if self.progress.load_existing_run()?.is_none() {
            self.progress.start_new_run(Vec::new(), papers.len())?;
        }
        for paper in &papers {
            if !self.progress.contains(&paper.citation_key) {
                self.progress
                    .add_paper(&paper.citation_key, &relative_pdf_path(&paper.citation_key))?;
            }
        }
        let results = self.scheduler.summarize_all(&papers, workers).await;
        if let Err(e) = self.progress.save_progress() {
            warn!(error = %e, "final progress save failed");
        }
        Ok(results)
    }

    /// Drop library entries without a PDF and stale partial downloads.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for entry in self.library.get_entries_without_pdf() {
            if self.library.remove_by_key(&entry.citation_key)? {
                report.removed_entries.push(entry.citation_key);
            }
        }
        report.removed_temp_files = remove_partial_files(self.downloads.pdf_dir())?;
        info!(
            entries = report.removed_entries.len(),
            temp_files = report.removed_temp_files.len(),
            "cleanup finished"
        );
        Ok(report)
    }

    pub fn status(&self) -> Result<Option<RunProgress>> {
        Ok(self.progress.load_existing_run()?)
    }
}

fn is_set(flag: Option<&watch::Receiver<bool>>) -> bool {
    flag.is_some_and(|rx| *rx.borrow())
}

fn same_keywords(a: &[String], b: &[String]) -> bool {
    let norm = |v: &[String]| -> HashSet<String> {
        v.iter().map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty()).collect()
    };
    norm(a) == norm(b)
}

fn remove_partial_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        let is_partial = path
            .extension()
            .is_some_and(|ext| ext == "part" || ext == "tmp");
        if is_partial && path.is_file() {
            std::fs::remove_file(&path)?;
            removed.push(path);
        }
    }
    Ok(removed)
}
