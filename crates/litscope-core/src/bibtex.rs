use crate::models::LibraryEntry;

/// Render one library entry as a BibTeX record.
pub fn generate_bibtex(entry: &LibraryEntry) -> String {
    let entry_type = if entry.venue.is_some() { "article" } else { "misc" };

    let mut bib = format!("@{}{{{},\n", entry_type, entry.citation_key);

    bib.push_str(&format!("  title = {{{}}},\n", escape_bibtex(&entry.title)));

    if !entry.authors.is_empty() {
        let authors = entry.authors.join(" and ");
        bib.push_str(&format!("  author = {{{}}},\n", escape_bibtex(&authors)));
    }

    if let Some(year) = entry.year {
        bib.push_str(&format!("  year = {{{}}},\n", year));
    }

    if let Some(venue) = &entry.venue {
        bib.push_str(&format!("  journal = {{{}}},\n", escape_bibtex(venue)));
    }

    if let Some(doi) = &entry.doi {
        bib.push_str(&format!("  doi = {{{}}},\n", escape_bibtex(doi)));
    }

    if !entry.url.is_empty() {
        bib.push_str(&format!("  url = {{{}}},\n", entry.url));
    }

    if let Some(pdf_path) = &entry.pdf_path {
        bib.push_str(&format!("  file = {{{}}},\n", pdf_path));
    }

    bib.push_str("}\n");
    bib
}

/// Render a full bibliography, one record per entry, in the given order.
pub fn generate_bibliography<'a>(entries: impl IntoIterator<Item = &'a LibraryEntry>) -> String {
    entries
        .into_iter()
        .map(generate_bibtex)
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_bibtex(s: &str) -> String {
    s.replace('&', "\\&")
        .replace('_', "\\_")
        .replace('$', "\\$")
        .replace('%', "\\%")
        .replace('#', "\\#")
        .replace('{', "\\{")
        .replace('}', "\\}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchResult;

    #[test]
    fn test_generate_bibtex() {
        let mut result = SearchResult::new("Attention Is All You Need", "arxiv");
        result.authors = vec!["Vaswani, Ashish".to_string()];
        result.year = Some(2017);
        result.doi = Some("10.48550/arXiv.1706.03762".to_string());
        let entry = LibraryEntry::from_search_result("vaswani2017attention".into(), &result);

        let bib = generate_bibtex(&entry);
        assert!(bib.starts_with("@misc{vaswani2017attention,"));
        assert!(bib.contains("title = {Attention Is All You Need}"));
        assert!(bib.contains("author = {Vaswani, Ashish}"));
        assert!(bib.contains("doi = {10.48550/arxiv.1706.03762}"));
    }

    #[test]
    fn special_characters_are_escaped() {
        let result = SearchResult::new("R&D in 100% of cases", "arxiv");
        let entry = LibraryEntry::from_search_result("unknownrd".into(), &result);
        let bib = generate_bibtex(&entry);
        assert!(bib.contains("R\\&D in 100\\% of cases"));
    }
}
