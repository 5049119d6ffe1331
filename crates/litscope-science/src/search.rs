use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use litscope_core::SearchResult;
use tracing::{debug, info, warn};

use crate::dedup::Deduplicator;
use crate::sources::{PaperSource, SourceStatus};

/// Fans keyword queries out to every search-capable source and merges the answers.
pub struct SearchAggregator {
    sources: Vec<Arc<dyn PaperSource>>,
    deduplicator: Deduplicator,
    health: Mutex<BTreeMap<String, SourceStatus>>,
}

impl SearchAggregator {
    pub fn new(sources: Vec<Arc<dyn PaperSource>>) -> Self {
        Self {
            sources,
            deduplicator: Deduplicator::new(),
            health: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_title_threshold(mut self, threshold: f64) -> Self {
        self.deduplicator = self.deduplicator.with_title_threshold(threshold);
        self
    }

    /// Query every search-capable source for every keyword, then deduplicate.
    ///
    /// A failing source contributes nothing for that keyword and is marked
    /// unavailable in [`source_health`](Self::source_health); it never fails the
    /// whole search. Each keyword contributes at most `limit_per_keyword` unique
    /// results. Result order follows keyword order, then source order.
    pub async fn search(&self, keywords: &[String], limit_per_keyword: usize) -> Vec<SearchResult> {
        let searchable: Vec<&Arc<dyn PaperSource>> =
            self.sources.iter().filter(|s| s.supports_search()).collect();
        if searchable.is_empty() {
            warn!("no search-capable sources configured");
            return Vec::new();
        }

        let mut raw_count = 0;
        let mut merged = Vec::new();
        for keyword in keywords.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            let calls = searchable.iter().map(|source| async move {
                let started = Instant::now();
                let outcome = source.search(keyword, limit_per_keyword).await;
                (source.name().to_string(), outcome, started.elapsed())
            });

            let mut per_keyword = Vec::new();
            for (name, outcome, elapsed) in join_all(calls).await {
                match outcome {
                    Ok(results) => {
                        debug!(source = %name, keyword, count = results.len(), "source answered");
                        self.record(&name, |s| s.record_success(elapsed.as_millis() as u64));
                        per_keyword.extend(results);
                    }
                    Err(e) => {
                        warn!(source = %name, keyword, error = %e, "source search failed");
                        self.record(&name, |s| s.record_failure(e.to_string()));
                    }
                }
            }

            raw_count += per_keyword.len();
            let mut unique = self.deduplicator.dedup(per_keyword);
            unique.truncate(limit_per_keyword);
            merged.extend(unique);
        }

        let results = self.deduplicator.dedup(merged);
        info!(
            keywords = keywords.len(),
            raw = raw_count,
            unique = results.len(),
            "search complete"
        );
        results
    }

    /// Last observed status per source name.
    pub fn source_health(&self) -> BTreeMap<String, SourceStatus> {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, name: &str, update: impl FnOnce(&mut SourceStatus)) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        update(health.entry(name.to_string()).or_default());
    }
}
