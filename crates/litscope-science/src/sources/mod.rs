use async_trait::async_trait;
use chrono::{DateTime, Utc};
use litscope_core::SearchResult;
use serde::Serialize;

use crate::error::Result;

pub mod arxiv;
pub mod semantic_scholar;
pub mod unpaywall;

pub use arxiv::ArxivSource;
pub use semantic_scholar::SemanticScholarSource;
pub use unpaywall::UnpaywallSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Keyword search over a paper index.
    Search,
    /// Resolves an already-known paper to open-access PDF locations.
    OpenAccess,
}

/// A paper provider.
///
/// Search-capable providers feed the aggregator; any provider may also act as
/// a fallback PDF resolver for the download manager.
#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType {
        SourceType::Search
    }

    fn supports_search(&self) -> bool {
        self.source_type() == SourceType::Search
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;

    /// Candidate PDF URLs for an already-known paper. Empty when unknown.
    async fn resolve_pdf_urls(&self, _result: &SearchResult) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Health of one provider as observed by the aggregator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStatus {
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
}

impl SourceStatus {
    pub fn record_success(&mut self, latency_ms: u64) {
        self.available = true;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_checked = Some(Utc::now());
        self.latency_ms = Some(latency_ms);
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.available = false;
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
        self.last_checked = Some(Utc::now());
    }
}

/// Collapse whitespace runs, as found in feed titles and abstracts.
pub(crate) fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value.map(|v| clean_text(&v)).filter(|v| !v.is_empty())
}
