use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScienceError};

// YYMM.NNNN or YYMM.NNNNN, optional version
static NEW_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}\.\d{4,5})(?:v(\d+))?$").expect("valid arXiv id regex"));

// archive(.SUBJ)/YYMMNNN, optional version
static OLD_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z\-]+(?:\.[A-Z]{2})?/\d{7})(?:v(\d+))?$").expect("valid arXiv id regex")
});

const URL_PREFIXES: &[&str] = &[
    "https://arxiv.org/abs/",
    "http://arxiv.org/abs/",
    "https://arxiv.org/pdf/",
    "http://arxiv.org/pdf/",
    "https://export.arxiv.org/abs/",
    "http://export.arxiv.org/abs/",
    "arXiv:",
    "arxiv:",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArxivId {
    /// Identifier without version, e.g. `1706.03762` or `hep-th/9901001`.
    pub id: String,
    pub version: Option<u32>,
}

impl ArxivId {
    /// Accepts bare ids, `arXiv:` prefixes and abs/pdf URLs.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let stripped = URL_PREFIXES
            .iter()
            .find_map(|prefix| input.strip_prefix(prefix))
            .unwrap_or(input);
        let stripped = stripped
            .split(['?', '#'])
            .next()
            .unwrap_or(stripped)
            .trim_end_matches('/')
            .trim_end_matches(".pdf");

        let caps = NEW_FORMAT
            .captures(stripped)
            .or_else(|| OLD_FORMAT.captures(stripped))
            .ok_or_else(|| ScienceError::InvalidArxivId(input.to_string()))?;

        let id = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ScienceError::InvalidArxivId(input.to_string()))?;
        let version = caps.get(2).and_then(|v| v.as_str().parse::<u32>().ok());
        Ok(Self { id, version })
    }

    pub fn abs_url(&self) -> String {
        format!("https://arxiv.org/abs/{}", self.versioned())
    }

    pub fn pdf_url(&self) -> String {
        format!("https://arxiv.org/pdf/{}", self.versioned())
    }

    fn versioned(&self) -> String {
        match self.version {
            Some(v) => format!("{}v{v}", self.id),
            None => self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_format_with_and_without_version() {
        let id = ArxivId::parse("2301.04567").unwrap();
        assert_eq!(id.id, "2301.04567");
        assert_eq!(id.version, None);
        assert_eq!(id.pdf_url(), "https://arxiv.org/pdf/2301.04567");

        let id = ArxivId::parse("arXiv:2301.04567v5").unwrap();
        assert_eq!(id.version, Some(5));
        assert_eq!(id.abs_url(), "https://arxiv.org/abs/2301.04567v5");
    }

    #[test]
    fn old_format() {
        let id = ArxivId::parse("hep-th/9901001v2").unwrap();
        assert_eq!(id.id, "hep-th/9901001");
        assert_eq!(id.version, Some(2));
    }

    #[test]
    fn urls_are_accepted() {
        assert_eq!(
            ArxivId::parse("http://arxiv.org/abs/1706.03762v7").unwrap().id,
            "1706.03762"
        );
        assert_eq!(
            ArxivId::parse("https://arxiv.org/pdf/1706.03762.pdf").unwrap().id,
            "1706.03762"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(ArxivId::parse("12345").is_err());
        assert!(ArxivId::parse("not-arxiv").is_err());
        assert!(ArxivId::parse("123.456").is_err());
    }
}
