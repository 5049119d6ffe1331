use std::time::Duration;

use async_trait::async_trait;
use litscope_core::SearchResult;
use reqwest::Url;
use serde_json::Value;

use crate::error::{Result, ScienceError};
use crate::http::RateLimitedClient;
use crate::identifiers::Doi;
use crate::sources::{PaperSource, SourceType};

const BASE_URL: &str = "https://api.unpaywall.org/v2";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OaLocation {
    pub url: Option<String>,
    pub url_for_pdf: Option<String>,
    pub host_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnpaywallRecord {
    pub doi: String,
    pub is_oa: bool,
    pub best_oa_location: Option<OaLocation>,
    pub oa_locations: Vec<OaLocation>,
}

impl UnpaywallRecord {
    pub fn from_json(v: &Value) -> Self {
        Self {
            doi: v
                .get("doi")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            is_oa: v.get("is_oa").and_then(Value::as_bool).unwrap_or(false),
            best_oa_location: v.get("best_oa_location").and_then(parse_oa_location),
            oa_locations: v
                .get("oa_locations")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(parse_oa_location).collect())
                .unwrap_or_default(),
        }
    }

    /// Direct PDF links first (best location leading), then landing URLs, deduplicated.
    pub fn pdf_candidates(&self) -> Vec<String> {
        let locations = self.best_oa_location.iter().chain(self.oa_locations.iter());
        let direct = locations.clone().filter_map(|l| l.url_for_pdf.as_deref());
        let landing = locations.filter_map(|l| l.url.as_deref());

        let mut out: Vec<String> = Vec::new();
        for url in direct.chain(landing) {
            let url = url.trim();
            if !url.is_empty() && !out.iter().any(|u| u == url) {
                out.push(url.to_string());
            }
        }
        out
    }
}

fn parse_oa_location(v: &Value) -> Option<OaLocation> {
    if !v.is_object() {
        return None;
    }
    let field = |name: &str| {
        v.get(name)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .filter(|s| !s.trim().is_empty())
    };
    Some(OaLocation {
        url: field("url"),
        url_for_pdf: field("url_for_pdf"),
        host_type: field("host_type"),
    })
}

/// DOI → open-access location resolver. Has no keyword search.
pub struct UnpaywallSource {
    client: RateLimitedClient,
    email: String,
    base_url: String,
}

impl UnpaywallSource {
    pub fn new(email: String, user_agent: &str) -> Result<Self> {
        Self::with_params(BASE_URL, Duration::from_millis(200), email, user_agent)
    }

    pub fn with_params(
        base_url: &str,
        min_interval: Duration,
        email: String,
        user_agent: &str,
    ) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::new(min_interval, 3, user_agent)?,
            email,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn lookup(&self, doi: &Doi) -> Result<UnpaywallRecord> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ScienceError::Parse(format!("invalid Unpaywall base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ScienceError::Parse("invalid Unpaywall base URL".to_string()))?
            .pop_if_empty()
            .push(&doi.normalized);
        url.query_pairs_mut().append_pair("email", &self.email);

        let json: Value = self.client.get_json(url.as_str()).await?;
        Ok(UnpaywallRecord::from_json(&json))
    }
}

#[async_trait]
impl PaperSource for UnpaywallSource {
    fn name(&self) -> &str {
        "unpaywall"
    }

    fn source_type(&self) -> SourceType {
        SourceType::OpenAccess
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchResult>> {
        Err(ScienceError::SourceUnavailable(
            "unpaywall does not support keyword search".to_string(),
        ))
    }

    async fn resolve_pdf_urls(&self, result: &SearchResult) -> Result<Vec<String>> {
        let Some(doi) = result.doi.as_deref().and_then(|d| Doi::parse(d).ok()) else {
            return Ok(Vec::new());
        };
        let record = self.lookup(&doi).await?;
        Ok(record.pdf_candidates())
    }
}
