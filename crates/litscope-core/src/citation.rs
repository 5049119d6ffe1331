//! Citation key derivation: `{surname}{year}{titleword}`, lower-cased.

use crate::models::SearchResult;

const TITLE_STOPWORDS: &[&str] = &[
    "a", "an", "the", "on", "of", "in", "for", "to", "and", "is", "are", "towards", "toward",
];

/// Base citation key before collision handling.
pub fn base_citation_key(result: &SearchResult) -> String {
    let author = result
        .first_author()
        .map(author_surname)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let year = result.year.map(|y| y.to_string()).unwrap_or_default();

    let title_word = first_significant_word(&result.title);

    format!("{author}{year}{title_word}")
}

/// Append `_2`, `_3`, … until `is_taken` returns false.
pub fn disambiguate(base: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_string();
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}_{n}");
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// "Friston, Karl J." → "friston", "Karl J. Friston" → "friston".
pub fn author_surname(author: &str) -> String {
    let author = author.trim();
    let raw = match author.split_once(',') {
        Some((last, _)) => last,
        None => author.split_whitespace().last().unwrap_or(author),
    };
    ascii_alnum_lower(raw)
}

fn first_significant_word(title: &str) -> String {
    let words: Vec<String> = title
        .split_whitespace()
        .map(ascii_alnum_lower)
        .filter(|w| !w.is_empty())
        .collect();

    words
        .iter()
        .find(|w| !TITLE_STOPWORDS.contains(&w.as_str()))
        .or_else(|| words.first())
        .cloned()
        .unwrap_or_default()
}

fn ascii_alnum_lower(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, authors: &[&str], year: Option<i32>) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            year,
            source: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn key_from_natural_order_name() {
        let r = result("Attention Is All You Need", &["Ashish Vaswani"], Some(2017));
        assert_eq!(base_citation_key(&r), "vaswani2017attention");
    }

    #[test]
    fn key_from_comma_name_and_stopword_title() {
        let r = result("The free-energy principle", &["Friston, Karl"], Some(2010));
        assert_eq!(base_citation_key(&r), "friston2010freeenergy");
    }

    #[test]
    fn key_without_author_or_year() {
        let r = result("Predictive coding", &[], None);
        assert_eq!(base_citation_key(&r), "unknownpredictive");
    }

    #[test]
    fn disambiguate_appends_suffix() {
        let taken = ["friston2010free", "friston2010free_2"];
        let key = disambiguate("friston2010free", |k| taken.contains(&k));
        assert_eq!(key, "friston2010free_3");
    }
}
