use litscope_core::SearchResult;
use litscope_core::citation::author_surname;

pub const DEFAULT_TITLE_THRESHOLD: f64 = 0.91;

/// Order-preserving duplicate removal over search results.
///
/// Two results are the same paper when they share a DOI, or, when at least one
/// side has no DOI, when their normalized titles are similar above the threshold
/// and their first-author surnames agree. The first occurrence is kept and
/// absorbs fields that only a later duplicate carries.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    title_similarity_threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            title_similarity_threshold: DEFAULT_TITLE_THRESHOLD,
        }
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title_threshold(mut self, threshold: f64) -> Self {
        self.title_similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn dedup(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut kept: Vec<(PaperKey, SearchResult)> = Vec::with_capacity(results.len());

        for result in results {
            let key = PaperKey::of(&result);
            match kept.iter_mut().find(|(k, _)| self.same_paper(k, &key)) {
                Some((existing_key, existing)) => {
                    absorb(existing, result);
                    if existing_key.doi.is_none() {
                        existing_key.doi = key.doi;
                    }
                }
                None => kept.push((key, result)),
            }
        }

        kept.into_iter().map(|(_, r)| r).collect()
    }

    fn same_paper(&self, a: &PaperKey, b: &PaperKey) -> bool {
        if let (Some(x), Some(y)) = (&a.doi, &b.doi) {
            return x == y;
        }
        let authors_agree = a.surname.is_empty() || b.surname.is_empty() || a.surname == b.surname;
        authors_agree && similar_titles(&a.title, &b.title, self.title_similarity_threshold)
    }
}

struct PaperKey {
    doi: Option<String>,
    title: String,
    surname: String,
}

impl PaperKey {
    fn of(result: &SearchResult) -> Self {
        Self {
            doi: result.normalized_doi(),
            title: normalize_title(&result.title),
            surname: result.first_author().map(author_surname).unwrap_or_default(),
        }
    }
}

fn absorb(kept: &mut SearchResult, dup: SearchResult) {
    if kept.doi.is_none() {
        kept.doi = dup.doi;
    }
    if kept.pdf_url.is_none() {
        kept.pdf_url = dup.pdf_url;
    }
    if kept.year.is_none() {
        kept.year = dup.year;
    }
    if kept.authors.is_empty() {
        kept.authors = dup.authors;
    }
    if kept.abstract_text.is_empty() {
        kept.abstract_text = dup.abstract_text;
    }
    if kept.venue.is_none() {
        kept.venue = dup.venue;
    }
    if kept.url.is_empty() {
        kept.url = dup.url;
    }
}

pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn similar_titles(a: &str, b: &str, threshold: f64) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    if a.len() < 5 || b.len() < 5 {
        return false;
    }
    strsim::normalized_levenshtein(a, b) >= threshold
}
