use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bibtex::generate_bibliography;
use crate::citation::{author_surname, base_citation_key, disambiguate};
use crate::error::{CoreError, Result};
use crate::models::{LibraryEntry, SearchResult};
use crate::storage::atomic::{write_atomic, write_json_atomic};

const INDEX_VERSION: u32 = 1;

/// On-disk shape of `library.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LibraryDocument {
    version: u32,
    updated_at: DateTime<Utc>,
    entries: BTreeMap<String, LibraryEntry>,
}

/// Result of [`LibraryIndex::add_or_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub citation_key: String,
    pub already_existed: bool,
}

/// Deduplicated catalog of papers keyed by citation key.
///
/// Every mutation takes the lock, applies the change, and rewrites the
/// index (and the BibTeX export) before releasing it.
pub struct LibraryIndex {
    path: PathBuf,
    bibliography_path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, LibraryEntry>>,
}

impl LibraryIndex {
    /// Open the index at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>, bibliography_path: Option<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            load_document(&path)?.entries
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "library index opened");
        Ok(Self {
            path,
            bibliography_path,
            entries: Mutex::new(entries),
        })
    }

    /// Insert a new paper or merge into the existing entry for the same paper.
    ///
    /// Same paper means: same DOI, or same normalized title + first-author surname
    /// when either side lacks a DOI.
    pub fn add_or_update(&self, result: &SearchResult) -> Result<AddOutcome> {
        let mut entries = self.lock();

        if let Some(key) = find_existing(&entries, result) {
            let previous = entries.get(&key).cloned();
            let updated = entries
                .get_mut(&key)
                .map(|entry| entry.merge_from(result))
                .unwrap_or_default();
            if !updated.is_empty() {
                debug!(citation_key = %key, fields = ?updated, "library entry updated");
                if let Err(e) = self.persist(&entries) {
                    if let Some(previous) = previous {
                        entries.insert(key, previous);
                    }
                    return Err(e);
                }
            }
            return Ok(AddOutcome {
                citation_key: key,
                already_existed: true,
            });
        }

        let base = base_citation_key(result);
        let key = disambiguate(&base, |candidate| entries.contains_key(candidate));
        let entry = LibraryEntry::from_search_result(key.clone(), result);
        entries.insert(key.clone(), entry);
        if let Err(e) = self.persist(&entries) {
            entries.remove(&key);
            return Err(e);
        }
        info!(citation_key = %key, title = %result.title, "added paper to library");

        Ok(AddOutcome {
            citation_key: key,
            already_existed: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<LibraryEntry> {
        self.lock().get(key).cloned()
    }

    /// Snapshot of all entries, ordered by citation key.
    pub fn list_entries(&self) -> Vec<LibraryEntry> {
        self.lock().values().cloned().collect()
    }

    pub fn get_entries_without_pdf(&self) -> Vec<LibraryEntry> {
        self.lock()
            .values()
            .filter(|e| !e.has_pdf())
            .cloned()
            .collect()
    }

    /// Record where the PDF for `key` lives, relative to the data directory.
    pub fn set_pdf_path(&self, key: &str, pdf_path: &str) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| CoreError::PaperNotFound(key.to_string()))?;
        if entry.pdf_path.as_deref() == Some(pdf_path) {
            return Ok(());
        }
        let previous = entry.pdf_path.replace(pdf_path.to_string());
        entry.updated_at = Utc::now();
        let outcome = self.persist(&entries);
        if outcome.is_err()
            && let Some(entry) = entries.get_mut(key)
        {
            entry.pdf_path = previous;
        }
        outcome
    }

    pub fn remove_by_key(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock();
        let Some(removed) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), removed);
            return Err(e);
        }
        info!(citation_key = %key, "removed paper from library");
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, LibraryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, LibraryEntry>) -> Result<()> {
        let document = LibraryDocument {
            version: INDEX_VERSION,
            updated_at: Utc::now(),
            entries: entries.clone(),
        };
        write_json_atomic(&self.path, &document)?;

        if let Some(bib_path) = &self.bibliography_path {
            let bib = generate_bibliography(entries.values());
            write_atomic(bib_path, bib.as_bytes())?;
        }
        Ok(())
    }
}

fn load_document(path: &Path) -> Result<LibraryDocument> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| CoreError::CorruptState {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn find_existing(entries: &BTreeMap<String, LibraryEntry>, result: &SearchResult) -> Option<String> {
    if let Some(doi) = result.normalized_doi()
        && let Some(entry) = entries.values().find(|e| e.doi.as_deref() == Some(doi.as_str()))
    {
        return Some(entry.citation_key.clone());
    }

    let title = normalize_title(&result.title);
    if title.is_empty() {
        return None;
    }
    let surname = result.first_author().map(author_surname).unwrap_or_default();
    let result_doi = result.normalized_doi();

    entries
        .values()
        .find(|e| {
            let doi_conflict = matches!((&e.doi, &result_doi), (Some(a), Some(b)) if a != b);
            !doi_conflict
                && normalize_title(&e.title) == title
                && e.authors.first().map(|a| author_surname(a)).unwrap_or_default() == surname
        })
        .map(|e| e.citation_key.clone())
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fep(doi: Option<&str>) -> SearchResult {
        SearchResult {
            title: "The free-energy principle: a unified brain theory?".to_string(),
            authors: vec!["Karl Friston".to_string()],
            year: Some(2010),
            doi: doi.map(str::to_string),
            url: "https://www.nature.com/articles/nrn2787".to_string(),
            source: "semantic_scholar".to_string(),
            ..Default::default()
        }
    }

    fn open(dir: &TempDir) -> LibraryIndex {
        LibraryIndex::open(
            dir.path().join("library.json"),
            Some(dir.path().join("library.bib")),
        )
        .unwrap()
    }

    #[test]
    fn failed_write_does_not_leave_entry_behind() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("lib");
        let index = LibraryIndex::open(store_dir.join("library.json"), None).unwrap();
        fs::write(&store_dir, b"not a directory").unwrap();

        assert!(index.add_or_update(&fep(Some("10.1038/nrn2787"))).is_err());
        assert!(index.is_empty());

        fs::remove_file(&store_dir).unwrap();
        let outcome = index.add_or_update(&fep(Some("10.1038/nrn2787"))).unwrap();
        assert!(!outcome.already_existed);
        assert!(store_dir.join("library.json").exists());
    }

    #[test]
    fn same_doi_yields_same_key_without_duplicate() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        let first = index.add_or_update(&fep(Some("10.1038/nrn2787"))).unwrap();
        let second = index.add_or_update(&fep(Some("https://doi.org/10.1038/NRN2787"))).unwrap();

        assert_eq!(first.citation_key, "friston2010freeenergy");
        assert!(!first.already_existed);
        assert_eq!(second.citation_key, first.citation_key);
        assert!(second.already_existed);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn different_paper_with_same_base_key_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index.add_or_update(&fep(Some("10.1038/nrn2787"))).unwrap();
        let mut other = fep(Some("10.1098/rstb.2008.0300"));
        other.title = "The free-energy principle: a rough guide to the brain?".to_string();
        let outcome = index.add_or_update(&other).unwrap();

        assert_eq!(outcome.citation_key, "friston2010freeenergy_2");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn entries_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let key = {
            let index = open(&dir);
            let key = index.add_or_update(&fep(None)).unwrap().citation_key;
            index.set_pdf_path(&key, "pdfs/friston2010freeenergy.pdf").unwrap();
            key
        };

        let reopened = open(&dir);
        let entry = reopened.get(&key).unwrap();
        assert_eq!(entry.pdf_path.as_deref(), Some("pdfs/friston2010freeenergy.pdf"));
        let bib = std::fs::read_to_string(dir.path().join("library.bib")).unwrap();
        assert!(bib.contains("@misc{friston2010freeenergy,"));
    }

    #[test]
    fn title_match_without_doi_merges_fields() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        let first = index.add_or_update(&fep(None)).unwrap();
        let second = index.add_or_update(&fep(Some("10.1038/nrn2787"))).unwrap();

        assert_eq!(first.citation_key, second.citation_key);
        assert_eq!(index.get(&first.citation_key).unwrap().doi.as_deref(), Some("10.1038/nrn2787"));
    }

    #[test]
    fn entries_without_pdf_and_removal() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        let a = index.add_or_update(&fep(None)).unwrap().citation_key;
        let mut other = SearchResult::new("Active inference and learning", "arxiv");
        other.authors = vec!["Thomas Parr".to_string()];
        let b = index.add_or_update(&other).unwrap().citation_key;
        index.set_pdf_path(&a, "pdfs/a.pdf").unwrap();

        let missing = index.get_entries_without_pdf();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].citation_key, b);

        assert!(index.remove_by_key(&b).unwrap());
        assert!(!index.remove_by_key(&b).unwrap());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn corrupt_index_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = LibraryIndex::open(&path, None).err().unwrap();
        assert!(matches!(err, CoreError::CorruptState { .. }));
    }

    #[test]
    fn concurrent_adds_do_not_lose_entries() {
        let dir = TempDir::new().unwrap();
        let index = std::sync::Arc::new(open(&dir));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = index.clone();
                std::thread::spawn(move || {
                    let mut r = SearchResult::new(format!("Paper number {i}"), "arxiv");
                    r.authors = vec!["Ada Lovelace".to_string()];
                    r.year = Some(2020);
                    index.add_or_update(&r).unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(index.len(), 8);
        let reopened = open(&dir);
        assert_eq!(reopened.len(), 8);
    }
}
