use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike};
use litscope_core::SearchResult;
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, ScienceError};
use crate::http::RateLimitedClient;
use crate::identifiers::{ArxivId, Doi};
use crate::sources::{PaperSource, clean_optional, clean_text};

const BASE_URL: &str = "http://export.arxiv.org/api/query";
/// arXiv asks API clients to wait three seconds between calls.
const MIN_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: String,
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
    #[serde(rename = "arxiv:journal_ref", alias = "journal_ref")]
    journal_ref: Option<String>,
    #[serde(rename = "arxiv:doi", alias = "doi")]
    doi: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@type")]
    link_type: Option<String>,
    #[serde(rename = "@title")]
    title: Option<String>,
}

pub struct ArxivSource {
    client: RateLimitedClient,
    base_url: String,
}

impl ArxivSource {
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_params(BASE_URL, MIN_INTERVAL, user_agent)
    }

    pub fn with_params(base_url: &str, min_interval: Duration, user_agent: &str) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::new(min_interval, 3, user_agent)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self, query: &str, limit: usize) -> String {
        let terms = query
            .split_whitespace()
            .map(|w| format!("all:{}", urlencoding::encode(w)))
            .collect::<Vec<_>>()
            .join("+AND+");
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{sep}search_query={terms}&start=0&max_results={limit}&sortBy=relevance",
            self.base_url
        )
    }
}

#[async_trait]
impl PaperSource for ArxivSource {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let url = self.search_url(query, limit);
        let xml = self.client.get(&url).await?;
        let mut results = parse_atom_feed(&xml)?;
        results.truncate(limit);
        debug!(query, count = results.len(), "arxiv search complete");
        Ok(results)
    }

    async fn resolve_pdf_urls(&self, result: &SearchResult) -> Result<Vec<String>> {
        let from_doi = result
            .doi
            .as_deref()
            .and_then(|d| Doi::parse(d).ok())
            .and_then(|d| d.arxiv_id());
        let from_url = ArxivId::parse(&result.url).ok();
        Ok(from_doi.or(from_url).map(|id| id.pdf_url()).into_iter().collect())
    }
}

/// Parse an arXiv Atom response into search results.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<SearchResult>> {
    let feed: AtomFeed =
        from_str(xml).map_err(|e| ScienceError::Parse(format!("invalid atom xml: {e}")))?;

    Ok(feed.entries.into_iter().filter_map(entry_to_result).collect())
}

fn entry_to_result(entry: AtomEntry) -> Option<SearchResult> {
    // The API reports query errors as a single entry whose id is not a paper.
    let arxiv_id = ArxivId::parse(entry.id.trim()).ok()?;

    let title = clean_text(&entry.title);
    if title.is_empty() {
        return None;
    }

    let year = entry
        .published
        .as_deref()
        .and_then(|p| DateTime::parse_from_rfc3339(p.trim()).ok())
        .map(|dt| dt.year());

    let pdf_url = entry
        .links
        .iter()
        .find(|link| {
            link.link_type.as_deref() == Some("application/pdf")
                || link.title.as_deref() == Some("pdf")
        })
        .and_then(|link| link.href.as_deref())
        .map(https)
        .unwrap_or_else(|| arxiv_id.pdf_url());

    let doi = entry
        .doi
        .and_then(|d| Doi::parse(&d).ok())
        .map(|d| d.normalized);

    Some(SearchResult {
        title,
        authors: entry
            .authors
            .into_iter()
            .map(|a| clean_text(&a.name))
            .filter(|a| !a.is_empty())
            .collect(),
        year,
        doi,
        url: arxiv_id.abs_url(),
        pdf_url: Some(pdf_url),
        abstract_text: clean_text(&entry.summary),
        source: "arxiv".to_string(),
        venue: clean_optional(entry.journal_ref),
    })
}

fn https(url: &str) -> String {
    match url.strip_prefix("http://arxiv.org/") {
        Some(rest) => format!("https://arxiv.org/{rest}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/"
      xmlns:arxiv="http://arxiv.org/schemas/atom">
  <id>http://arxiv.org/api/query</id>
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <updated>2023-08-02T17:54:37Z</updated>
    <published>2017-06-12T17:57:40Z</published>
    <title>
      Attention Is All You Need
    </title>
    <summary>
      The dominant sequence transduction models are based on recurrent networks.
    </summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <arxiv:journal_ref>NeurIPS 2017</arxiv:journal_ref>
    <arxiv:doi>10.48550/arXiv.1706.03762</arxiv:doi>
    <link rel="alternate" type="text/html" href="http://arxiv.org/abs/1706.03762v7" />
    <link title="pdf" rel="related" type="application/pdf" href="http://arxiv.org/pdf/1706.03762v7" />
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2301.04567v1</id>
    <published>2023-01-11T00:00:00Z</published>
    <title>The free energy principle made simpler</title>
    <summary>An accessible account.</summary>
    <author><name>Karl Friston</name></author>
  </entry>
</feed>
"#;

    #[test]
    fn parses_feed_entries() {
        let results = parse_atom_feed(FEED).unwrap();
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.title, "Attention Is All You Need");
        assert_eq!(first.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(first.year, Some(2017));
        assert_eq!(first.doi.as_deref(), Some("10.48550/arxiv.1706.03762"));
        assert_eq!(first.pdf_url.as_deref(), Some("https://arxiv.org/pdf/1706.03762v7"));
        assert_eq!(first.venue.as_deref(), Some("NeurIPS 2017"));
        assert!(first.abstract_text.starts_with("The dominant sequence"));

        let second = &results[1];
        assert_eq!(second.pdf_url.as_deref(), Some("https://arxiv.org/pdf/2301.04567v1"));
        assert_eq!(second.source, "arxiv");
    }

    #[test]
    fn empty_feed_yields_nothing() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><id>x</id></feed>"#;
        assert!(parse_atom_feed(xml).unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_queries_api_and_truncates() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search_query".into(), "all:free AND all:energy".into()),
                Matcher::UrlEncoded("max_results".into(), "1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/atom+xml")
            .with_body(FEED)
            .create_async()
            .await;

        let source = ArxivSource::with_params(
            &format!("{}/api/query", server.url()),
            Duration::ZERO,
            "litscope-test",
        )
        .unwrap();
        let results = source.search("free energy", 1).await.unwrap();

        assert_eq!(results.len(), 1);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn resolves_pdf_from_abs_url() {
        let source = ArxivSource::new("litscope-test").unwrap();
        let mut result = SearchResult::new("x", "semantic_scholar");
        result.url = "https://arxiv.org/abs/2301.04567".into();
        let urls = source.resolve_pdf_urls(&result).await.unwrap();
        assert_eq!(urls, vec!["https://arxiv.org/pdf/2301.04567".to_string()]);
    }
}
