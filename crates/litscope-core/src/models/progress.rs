use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── PaperStatus ───────────────────────────────────────────

/// Pipeline stage of a single paper within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    #[default]
    Discovered,
    Downloaded,
    Processing,
    Summarized,
    Failed,
}

impl PaperStatus {
    /// Forward-only transitions.
    ///
    /// `Failed -> Processing` is the explicit retry path. `Processing -> Processing`
    /// covers a run that crashed mid-summary and is being resumed.
    /// `Downloaded -> Summarized` happens when a summary file already exists on disk.
    /// Self-transitions only attach fields such as timings.
    pub fn can_transition_to(self, next: PaperStatus) -> bool {
        use PaperStatus::*;
        matches!(
            (self, next),
            (Discovered, Downloaded | Processing | Summarized | Failed)
                | (Downloaded, Downloaded | Processing | Summarized | Failed)
                | (Processing, Processing | Summarized | Failed)
                | (Failed, Processing | Failed | Summarized)
                | (Summarized, Summarized)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Summarized | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Downloaded => "downloaded",
            Self::Processing => "processing",
            Self::Summarized => "summarized",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ProgressEntry ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub citation_key: String,
    pub status: PaperStatus,
    pub pdf_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
    #[serde(default)]
    pub summary_attempts: u32,
    /// Seconds spent generating the summary.
    #[serde(default)]
    pub summary_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Seconds spent downloading the PDF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_time: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn new(citation_key: impl Into<String>, pdf_path: impl Into<String>) -> Self {
        Self {
            citation_key: citation_key.into(),
            status: PaperStatus::Downloaded,
            pdf_path: pdf_path.into(),
            summary_path: None,
            summary_attempts: 0,
            summary_time: 0.0,
            last_error: None,
            download_time: None,
            updated_at: Utc::now(),
        }
    }
}

/// Optional fields applied together with a status change.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub summary_path: Option<String>,
    pub summary_attempts: Option<u32>,
    pub summary_time: Option<f64>,
    pub last_error: Option<String>,
    pub download_time: Option<f64>,
}

impl EntryUpdate {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(message.into()),
            ..Default::default()
        }
    }
}

// ─── RunProgress ───────────────────────────────────────────

/// Durable state of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: String,
    pub keywords: Vec<String>,
    pub total_papers: usize,
    #[serde(default)]
    pub entries: BTreeMap<String, ProgressEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunProgress {
    pub fn new(keywords: Vec<String>, total_papers: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            keywords,
            total_papers,
            entries: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn count_with_status(&self, status: PaperStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    pub fn completed_summaries(&self) -> usize {
        self.count_with_status(PaperStatus::Summarized)
    }

    pub fn failed(&self) -> usize {
        self.count_with_status(PaperStatus::Failed)
    }

    /// A run is complete once every expected paper has settled. Failed papers
    /// are not retried within the run that failed them.
    pub fn is_complete(&self) -> bool {
        let settled = self.entries.values().filter(|e| e.status.is_terminal()).count();
        settled >= self.total_papers
    }

    /// Keys that still need summarization; `processing` counts as retryable.
    pub fn pending_keys(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.citation_key.clone())
            .collect()
    }

    /// Citation key → status, independent of timestamps.
    pub fn status_map(&self) -> BTreeMap<String, PaperStatus> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use PaperStatus::*;
        assert!(Downloaded.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Summarized));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));
        assert!(!Summarized.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Downloaded));
        assert!(!Summarized.can_transition_to(Failed));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&PaperStatus::Summarized).unwrap();
        assert_eq!(json, "\"summarized\"");
    }

    #[test]
    fn completion_and_pending_keys() {
        let mut run = RunProgress::new(vec!["free energy".into()], 2);
        let mut a = ProgressEntry::new("a", "pdfs/a.pdf");
        a.status = PaperStatus::Summarized;
        let mut b = ProgressEntry::new("b", "pdfs/b.pdf");
        b.status = PaperStatus::Processing;
        run.entries.insert("a".into(), a);
        run.entries.insert("b".into(), b);

        assert!(!run.is_complete());
        assert_eq!(run.pending_keys(), vec!["b".to_string()]);
        assert_eq!(run.completed_summaries(), 1);

        run.entries.get_mut("b").unwrap().status = PaperStatus::Failed;
        assert!(run.is_complete());
        assert!(run.pending_keys().is_empty());
        assert_eq!(run.failed(), 1);
    }
}
