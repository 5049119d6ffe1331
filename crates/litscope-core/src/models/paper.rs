use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── SearchResult ──────────────────────────────────────────

/// A single paper candidate returned by a search source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,

    /// Author names in byline order, e.g. "Karl Friston" or "Friston, Karl".
    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    /// Landing page URL.
    #[serde(default)]
    pub url: String,

    /// Direct PDF link declared by the source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: String,

    /// Provider tag, e.g. "arxiv" or "semantic_scholar".
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// Lower-cased DOI with resolver prefixes stripped.
    pub fn normalized_doi(&self) -> Option<String> {
        self.doi.as_deref().and_then(normalize_doi)
    }

    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// Strip `https://doi.org/` and `doi:` style prefixes and lower-case.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    let stripped = [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ]
    .iter()
    .find_map(|prefix| lower.strip_prefix(prefix))
    .unwrap_or(&lower)
    .trim();

    if stripped.starts_with("10.") && stripped.contains('/') {
        Some(stripped.to_string())
    } else {
        None
    }
}

// ─── LibraryEntry ──────────────────────────────────────────

/// A paper as persisted in the library index.
///
/// `citation_key` is assigned once on insert and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub citation_key: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: String,

    /// PDF location relative to the data directory, e.g. `pdfs/friston2010free.pdf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,

    /// Open key/value bag, e.g. the original `pdf_url`.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LibraryEntry {
    pub fn from_search_result(citation_key: String, result: &SearchResult) -> Self {
        let now = Utc::now();
        let mut metadata = BTreeMap::new();
        if let Some(pdf_url) = &result.pdf_url {
            metadata.insert("pdf_url".to_string(), pdf_url.clone());
        }
        Self {
            citation_key,
            title: result.title.trim().to_string(),
            authors: result.authors.clone(),
            year: result.year,
            doi: result.normalized_doi(),
            url: result.url.clone(),
            pdf_path: None,
            abstract_text: result.abstract_text.clone(),
            source: result.source.clone(),
            venue: result.venue.clone(),
            metadata,
            added_at: now,
            updated_at: now,
        }
    }

    /// Fill fields that are still empty from a newer sighting of the same paper.
    /// Returns the names of updated fields.
    pub fn merge_from(&mut self, result: &SearchResult) -> Vec<&'static str> {
        let mut updated = Vec::new();

        if self.doi.is_none()
            && let Some(doi) = result.normalized_doi()
        {
            self.doi = Some(doi);
            updated.push("doi");
        }
        if self.year.is_none() && result.year.is_some() {
            self.year = result.year;
            updated.push("year");
        }
        if self.authors.is_empty() && !result.authors.is_empty() {
            self.authors = result.authors.clone();
            updated.push("authors");
        }
        if self.url.is_empty() && !result.url.is_empty() {
            self.url = result.url.clone();
            updated.push("url");
        }
        if self.abstract_text.is_empty() && !result.abstract_text.is_empty() {
            self.abstract_text = result.abstract_text.clone();
            updated.push("abstract");
        }
        if self.venue.is_none() && result.venue.is_some() {
            self.venue = result.venue.clone();
            updated.push("venue");
        }
        if let Some(pdf_url) = &result.pdf_url
            && !self.metadata.contains_key("pdf_url")
        {
            self.metadata.insert("pdf_url".to_string(), pdf_url.clone());
            updated.push("pdf_url");
        }

        if !updated.is_empty() {
            self.updated_at = Utc::now();
        }
        updated
    }

    /// Rebuild a search result from the stored entry, used when re-downloading.
    pub fn to_search_result(&self) -> SearchResult {
        SearchResult {
            title: self.title.clone(),
            authors: self.authors.clone(),
            year: self.year,
            doi: self.doi.clone(),
            url: self.url.clone(),
            pdf_url: self.metadata.get("pdf_url").cloned(),
            abstract_text: self.abstract_text.clone(),
            source: self.source.clone(),
            venue: self.venue.clone(),
        }
    }

    pub fn has_pdf(&self) -> bool {
        self.pdf_path.is_some()
    }
}
