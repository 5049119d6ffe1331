//! Bounded-concurrency summarization: extract, generate, validate, persist.

mod report;

pub use report::SummaryDocument;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{StreamExt, future, stream};
use litscope_core::config::SummarizeConfig;
use litscope_core::storage::write_atomic;
use litscope_core::{EntryUpdate, PaperStatus, ProgressStore, TextExtractor};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::llm::{GenerateOptions, LanguageModel};
use crate::prompt::{SYSTEM_PROMPT, build_summary_prompt};
use crate::validator::{
    CRITICAL_SCORE_THRESHOLD, IssueCategory, QualityValidator, ValidationReport, word_count,
};

/// A downloaded paper ready for summarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperRef {
    pub citation_key: String,
    pub title: String,
    pub pdf_path: PathBuf,
}

/// Outcome for one paper. Failures are values, never errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummarizationResult {
    pub citation_key: String,
    pub success: bool,
    pub summary_text: Option<String>,
    pub input_chars: usize,
    pub input_words: usize,
    pub output_words: usize,
    /// Seconds spent in the generate/validate loop.
    pub generation_time: f64,
    pub attempts: u32,
    pub quality_score: f64,
    pub validation_errors: Vec<String>,
    pub summary_path: Option<PathBuf>,
    /// The summary file already existed and generation was bypassed.
    pub skipped: bool,
    pub error: Option<String>,
}

impl SummarizationResult {
    fn new(citation_key: &str) -> Self {
        Self {
            citation_key: citation_key.to_string(),
            ..Default::default()
        }
    }
}

/// The attempt that will be kept if nothing better comes along.
struct Candidate {
    text: String,
    words: usize,
    report: ValidationReport,
}

pub struct SummarizationScheduler {
    llm: Arc<dyn LanguageModel>,
    extractor: Arc<dyn TextExtractor>,
    validator: QualityValidator,
    progress: Arc<ProgressStore>,
    summaries_dir: PathBuf,
    config: SummarizeConfig,
    options: GenerateOptions,
    shutdown: Option<watch::Receiver<bool>>,
}

impl SummarizationScheduler {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        extractor: Arc<dyn TextExtractor>,
        validator: QualityValidator,
        progress: Arc<ProgressStore>,
        summaries_dir: impl Into<PathBuf>,
        config: SummarizeConfig,
    ) -> Self {
        Self {
            llm,
            extractor,
            validator,
            progress,
            summaries_dir: summaries_dir.into(),
            config,
            options: GenerateOptions::default().with_system(SYSTEM_PROMPT),
            shutdown: None,
        }
    }

    /// Generation settings; the fixed system prompt is used unless one is given.
    pub fn with_generate_options(mut self, mut options: GenerateOptions) -> Self {
        if options.system.is_none() {
            options.system = Some(SYSTEM_PROMPT.to_string());
        }
        self.options = options;
        self
    }

    /// Once the flag turns `true`, no further papers are dispatched.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    pub fn summary_path_for(&self, citation_key: &str) -> PathBuf {
        self.summaries_dir.join(format!("{citation_key}_summary.md"))
    }

    /// Summarize every paper with at most `max_workers` in flight.
    ///
    /// Planning runs before any work is dispatched: duplicates are dropped and
    /// papers whose summary file already exists are reported as skipped. Each
    /// remaining paper is handed to the pool exactly once. Results arrive in
    /// completion order.
    pub async fn summarize_all(
        &self,
        papers: &[PaperRef],
        max_workers: usize,
    ) -> Vec<SummarizationResult> {
        let max_workers = max_workers.max(1);
        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(papers.len());
        let mut pending = Vec::new();

        for paper in papers {
            if !seen.insert(paper.citation_key.as_str()) {
                debug!(citation_key = %paper.citation_key, "duplicate paper in batch ignored");
                continue;
            }
            self.track(paper);
            let summary_path = self.summary_path_for(&paper.citation_key);
            if tokio::fs::try_exists(&summary_path).await.unwrap_or(false) {
                results.push(self.skip(paper, summary_path));
            } else {
                pending.push(paper.clone());
            }
        }

        let skipped = results.len();
        let total = pending.len();
        info!(total, skipped, max_workers, "summarization started");

        let shutdown = self.shutdown.clone();
        let processed: Vec<SummarizationResult> = stream::iter(pending)
            .take_while(move |_| {
                let stop = shutdown.as_ref().is_some_and(|rx| *rx.borrow());
                future::ready(!stop)
            })
            .map(|paper| self.process(paper))
            .buffer_unordered(max_workers)
            .collect()
            .await;

        if processed.len() < total {
            info!(
                deferred = total - processed.len(),
                "interrupted; remaining papers left for the next run"
            );
        }
        let succeeded = processed.iter().filter(|r| r.success).count();
        info!(
            succeeded,
            failed = processed.len() - succeeded,
            skipped,
            "summarization finished"
        );

        results.extend(processed);
        results
    }

    fn track(&self, paper: &PaperRef) {
        if self.progress.contains(&paper.citation_key) {
            return;
        }
        let pdf_path = paper.pdf_path.to_string_lossy();
        if let Err(e) = self.progress.add_paper(&paper.citation_key, &pdf_path) {
            warn!(citation_key = %paper.citation_key, error = %e, "paper not tracked in progress");
        }
    }

    fn transition(&self, citation_key: &str, status: PaperStatus, update: EntryUpdate) {
        if let Err(e) = self.progress.update_entry_status(citation_key, status, update) {
            warn!(citation_key, status = %status, error = %e, "progress update rejected");
        }
    }

    fn skip(&self, paper: &PaperRef, summary_path: PathBuf) -> SummarizationResult {
        debug!(citation_key = %paper.citation_key, "summary exists, skipping");
        self.transition(
            &paper.citation_key,
            PaperStatus::Summarized,
            EntryUpdate {
                summary_path: Some(summary_path.to_string_lossy().into_owned()),
                ..Default::default()
            },
        );
        SummarizationResult {
            success: true,
            skipped: true,
            summary_path: Some(summary_path),
            ..SummarizationResult::new(&paper.citation_key)
        }
    }

    async fn process(&self, paper: PaperRef) -> SummarizationResult {
        let key = paper.citation_key.as_str();
        let mut result = SummarizationResult::new(key);
        self.transition(key, PaperStatus::Processing, EntryUpdate::default());

        let text = match self.extract(&paper.pdf_path).await {
            Ok(text) => text,
            Err(message) => return self.fail(result, message, 0.0),
        };
        if text.trim().chars().count() < self.config.min_text_chars {
            return self.fail(result, "insufficient text".to_string(), 0.0);
        }
        result.input_chars = text.chars().count();
        result.input_words = word_count(&text);

        let prompt = build_summary_prompt(&paper.title, key, &text, self.config.max_input_chars);
        let started = Instant::now();
        let (candidate, attempts, last_error) = self.generate_loop(key, &prompt, &text).await;
        let elapsed = started.elapsed().as_secs_f64();
        result.generation_time = elapsed;
        result.attempts = attempts;

        let Some(candidate) = candidate else {
            let message = last_error.unwrap_or_else(|| "no summary generated".to_string());
            return self.fail(result, format!("generation failed: {message}"), elapsed);
        };

        result.output_words = candidate.words;
        result.quality_score = candidate.report.score;
        result.validation_errors = candidate.report.all_messages();
        let below_minimum = candidate.words < self.config.min_words;
        if below_minimum && !candidate.report.has_issue(IssueCategory::Length) {
            result.validation_errors.push(format!(
                "summary has {} words, below the minimum of {}",
                candidate.words, self.config.min_words
            ));
        }

        let summary_path = self.summary_path_for(key);
        let document = SummaryDocument {
            citation_key: key,
            title: &paper.title,
            summary: &candidate.text,
            model: self.llm.model_name(),
            input_chars: result.input_chars,
            input_words: result.input_words,
            output_words: result.output_words,
            generation_time: result.generation_time,
            attempts,
            quality_score: result.quality_score,
            validation_errors: &result.validation_errors,
            generated_at: Utc::now(),
        }
        .render();

        if let Err(message) = persist(summary_path.clone(), document).await {
            return self.fail(result, format!("failed to save summary: {message}"), elapsed);
        }

        self.transition(
            key,
            PaperStatus::Summarized,
            EntryUpdate {
                summary_path: Some(summary_path.to_string_lossy().into_owned()),
                summary_attempts: Some(attempts),
                summary_time: Some(result.generation_time),
                ..Default::default()
            },
        );
        info!(
            citation_key = key,
            attempts,
            words = result.output_words,
            score = result.quality_score,
            elapsed_secs = result.generation_time,
            "summary saved"
        );

        result.success = true;
        result.summary_text = Some(candidate.text);
        result.summary_path = Some(summary_path);
        result
    }

    /// Up to `max_retries + 1` attempts. Stops at the first attempt that is
    /// long enough and free of critical low-score issues; otherwise keeps the
    /// last generated text.
    async fn generate_loop(
        &self,
        key: &str,
        prompt: &str,
        source_text: &str,
    ) -> (Option<Candidate>, u32, Option<String>) {
        let max_attempts = self.config.max_retries + 1;
        let mut candidate = None;
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let generated = match tokio::time::timeout(
                self.options.timeout,
                self.llm.generate(prompt, &self.options),
            )
            .await
            {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!(citation_key = key, attempt, error = %e, "LLM call failed");
                    last_error = Some(e.to_string());
                    continue;
                }
                Err(_) => {
                    warn!(citation_key = key, attempt, "LLM call timed out");
                    last_error = Some(format!(
                        "LLM call timed out after {}s",
                        self.options.timeout.as_secs()
                    ));
                    continue;
                }
            };

            let words = word_count(&generated);
            let report = self.validator.validate(&generated, source_text, key);
            let too_short = words < self.config.min_words;
            let critical = report.has_critical_issue() && report.score < CRITICAL_SCORE_THRESHOLD;
            candidate = Some(Candidate {
                text: generated,
                words,
                report,
            });

            if !too_short && !critical {
                break;
            }
            if attempt < max_attempts {
                debug!(citation_key = key, attempt, words, too_short, critical, "retrying summary");
            } else {
                warn!(citation_key = key, attempts, "retries exhausted, keeping last summary");
            }
        }

        (candidate, attempts, last_error)
    }

    async fn extract(&self, pdf_path: &Path) -> Result<String, String> {
        let extractor = Arc::clone(&self.extractor);
        let path = pdf_path.to_path_buf();
        match tokio::task::spawn_blocking(move || extractor.extract_text(&path)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(format!("text extraction failed: {e}")),
            Err(e) => Err(format!("text extraction task failed: {e}")),
        }
    }

    fn fail(&self, mut result: SummarizationResult, message: String, elapsed: f64) -> SummarizationResult {
        warn!(citation_key = %result.citation_key, error = %message, "summarization failed");
        self.transition(
            &result.citation_key,
            PaperStatus::Failed,
            EntryUpdate {
                summary_attempts: Some(result.attempts),
                summary_time: Some(elapsed),
                last_error: Some(message.clone()),
                ..Default::default()
            },
        );
        result.success = false;
        result.error = Some(message);
        result
    }
}

async fn persist(path: PathBuf, document: String) -> Result<(), String> {
    match tokio::task::spawn_blocking(move || write_atomic(&path, document.as_bytes())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}
