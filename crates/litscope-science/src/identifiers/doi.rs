use litscope_core::normalize_doi;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScienceError};
use crate::identifiers::arxiv::ArxivId;

const ARXIV_DOI_PREFIX: &str = "10.48550/arxiv.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Doi {
    pub raw: String,
    pub normalized: String,
    pub url: String,
}

impl Doi {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let normalized =
            normalize_doi(input).ok_or_else(|| ScienceError::InvalidDoi(input.to_string()))?;
        let suffix_empty = normalized
            .split_once('/')
            .is_none_or(|(_, suffix)| suffix.trim().is_empty());
        if suffix_empty {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        }

        Ok(Self {
            raw: input.to_string(),
            url: format!("https://doi.org/{normalized}"),
            normalized,
        })
    }

    /// DataCite DOIs minted by arXiv (`10.48550/arXiv.2301.04567`) map back to the arXiv id.
    pub fn arxiv_id(&self) -> Option<ArxivId> {
        self.normalized
            .strip_prefix(ARXIV_DOI_PREFIX)
            .and_then(|id| ArxivId::parse(id).ok())
    }
}
