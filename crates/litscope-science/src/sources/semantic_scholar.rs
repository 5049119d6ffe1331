use std::time::Duration;

use async_trait::async_trait;
use litscope_core::SearchResult;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, ScienceError};
use crate::http::RateLimitedClient;
use crate::identifiers::Doi;
use crate::sources::{PaperSource, clean_text};

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const SEARCH_FIELDS: &str = "title,authors,year,externalIds,url,abstract,venue,openAccessPdf";
const PDF_FIELDS: &str = "openAccessPdf";
const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
/// The public API allows about one request per second without a key.
const MIN_INTERVAL: Duration = Duration::from_millis(1100);
const MAX_PAGE_SIZE: usize = 100;

pub struct SemanticScholarSource {
    client: RateLimitedClient,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarSource {
    pub fn new(api_key: Option<String>, user_agent: &str) -> Result<Self> {
        Self::with_params(BASE_URL, MIN_INTERVAL, api_key, user_agent)
    }

    /// Reads the API key from the named environment variable, if set.
    pub fn from_env(key_env: &str, user_agent: &str) -> Result<Self> {
        let key = std::env::var(key_env).ok().filter(|k| !k.trim().is_empty());
        Self::new(key, user_agent)
    }

    pub fn with_params(
        base_url: &str,
        min_interval: Duration,
        api_key: Option<String>,
        user_agent: &str,
    ) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::new(min_interval, 3, user_agent)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| ScienceError::Parse(format!("invalid API key header: {e}")))?;
            headers.insert(API_KEY_HEADER, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl PaperSource for SemanticScholarSource {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/paper/search?query={}&limit={}&fields={}",
            self.base_url,
            urlencoding::encode(query.trim()),
            limit.min(MAX_PAGE_SIZE),
            SEARCH_FIELDS
        );
        let json: Value = self.client.get_json_with_headers(&url, self.headers()?).await?;
        let results = json
            .get("data")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(paper_from_json).collect::<Vec<_>>())
            .unwrap_or_default();
        debug!(query, count = results.len(), "semantic scholar search complete");
        Ok(results)
    }

    async fn resolve_pdf_urls(&self, result: &SearchResult) -> Result<Vec<String>> {
        let Some(doi) = result.doi.as_deref().and_then(|d| Doi::parse(d).ok()) else {
            return Ok(Vec::new());
        };
        let url = format!(
            "{}/paper/DOI:{}?fields={}",
            self.base_url, doi.normalized, PDF_FIELDS
        );
        let json: Value = self.client.get_json_with_headers(&url, self.headers()?).await?;
        Ok(open_access_pdf(&json).into_iter().collect())
    }
}

fn paper_from_json(v: &Value) -> Option<SearchResult> {
    let title = v
        .get("title")
        .and_then(Value::as_str)
        .map(clean_text)
        .filter(|t| !t.is_empty())?;

    let authors = v
        .get("authors")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .map(clean_text)
                .filter(|n| !n.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let year = v
        .get("year")
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok());

    let external_ids = v.get("externalIds");
    let doi = external_ids
        .and_then(|ids| ids.get("DOI"))
        .and_then(Value::as_str)
        .and_then(|d| Doi::parse(d).ok())
        .map(|d| d.normalized)
        .or_else(|| {
            external_ids
                .and_then(|ids| ids.get("ArXiv"))
                .and_then(Value::as_str)
                .map(|id| format!("10.48550/arxiv.{}", id.to_lowercase()))
        });

    let url = v
        .get("url")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .or_else(|| {
            v.get("paperId")
                .and_then(Value::as_str)
                .map(|id| format!("https://www.semanticscholar.org/paper/{id}"))
        })
        .unwrap_or_default();

    let venue = v
        .get("venue")
        .and_then(Value::as_str)
        .map(clean_text)
        .filter(|s| !s.is_empty());

    Some(SearchResult {
        title,
        authors,
        year,
        doi,
        url,
        pdf_url: open_access_pdf(v),
        abstract_text: v
            .get("abstract")
            .and_then(Value::as_str)
            .map(clean_text)
            .unwrap_or_default(),
        source: "semantic_scholar".to_string(),
        venue,
    })
}

fn open_access_pdf(v: &Value) -> Option<String> {
    v.get("openAccessPdf")
        .and_then(|pdf| pdf.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn source(server: &Server, key: Option<&str>) -> SemanticScholarSource {
        SemanticScholarSource::with_params(
            &server.url(),
            Duration::ZERO,
            key.map(str::to_string),
            "litscope-test",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn search_maps_papers() {
        let mut server = Server::new_async().await;
        let body = json!({
            "total": 2,
            "data": [
                {
                    "paperId": "abc",
                    "title": "The free-energy principle: a unified brain theory?",
                    "authors": [{"authorId": "1", "name": "Karl Friston"}],
                    "year": 2010,
                    "externalIds": {"DOI": "10.1038/NRN2787"},
                    "url": "https://www.semanticscholar.org/paper/abc",
                    "abstract": "A free-energy formulation.",
                    "venue": "Nature Reviews Neuroscience",
                    "openAccessPdf": {"url": "https://example.org/fep.pdf", "status": "GREEN"}
                },
                {
                    "paperId": "def",
                    "title": "Active inference",
                    "authors": [],
                    "year": null,
                    "externalIds": {"ArXiv": "2301.04567"},
                    "openAccessPdf": null
                },
                {"paperId": "ghi", "title": null}
            ]
        });
        let m = server
            .mock("GET", "/paper/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "free energy principle".into()),
                Matcher::UrlEncoded("limit".into(), "5".into()),
            ]))
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let results = source(&server, Some("secret"))
            .search("free energy principle", 5)
            .await
            .unwrap();
        m.assert_async().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doi.as_deref(), Some("10.1038/nrn2787"));
        assert_eq!(results[0].pdf_url.as_deref(), Some("https://example.org/fep.pdf"));
        assert_eq!(results[0].venue.as_deref(), Some("Nature Reviews Neuroscience"));
        assert_eq!(results[1].doi.as_deref(), Some("10.48550/arxiv.2301.04567"));
        assert!(results[1].pdf_url.is_none());
        assert_eq!(results[1].url, "https://www.semanticscholar.org/paper/def");
    }

    #[tokio::test]
    async fn resolve_uses_doi_lookup() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/paper/DOI:10.1038/nrn2787")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"openAccessPdf": {"url": "https://example.org/oa.pdf"}}).to_string())
            .create_async()
            .await;

        let mut result = SearchResult::new("x", "arxiv");
        result.doi = Some("10.1038/nrn2787".into());
        let urls = source(&server, None).resolve_pdf_urls(&result).await.unwrap();
        assert_eq!(urls, vec!["https://example.org/oa.pdf".to_string()]);

        let no_doi = SearchResult::new("y", "arxiv");
        assert!(source(&server, None).resolve_pdf_urls(&no_doi).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_errors_propagate() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/paper/search")
            .match_query(Matcher::Any)
            .with_status(400)
            .create_async()
            .await;

        let err = source(&server, None).search("x", 3).await.unwrap_err();
        assert!(matches!(err, ScienceError::Status { status: 400, .. }));
    }
}
