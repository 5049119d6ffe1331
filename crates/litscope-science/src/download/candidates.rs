//! PDF URL discovery from publisher landing pages.

use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};

use crate::identifiers::ArxivId;

static META_PDF: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"meta[name="citation_pdf_url"], meta[name="eprints.document_url"], meta[property="citation_pdf_url"]"#,
    )
    .expect("valid selector")
});
static LINK_PDF: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href], link[type="application/pdf"][href]"#).expect("valid selector"));

/// URLs derivable from the landing URL alone, without fetching it.
pub fn publisher_candidates(landing_url: &str) -> Vec<String> {
    let Ok(url) = Url::parse(landing_url) else {
        return Vec::new();
    };
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = url.path().trim_end_matches('/');
    let mut out = Vec::new();

    if host.ends_with("arxiv.org") {
        if let Ok(id) = ArxivId::parse(landing_url) {
            out.push(id.pdf_url());
        }
    } else if host.ends_with("biorxiv.org") || host.ends_with("medrxiv.org") {
        if path.starts_with("/content/") && !path.ends_with(".pdf") {
            let base = path.trim_end_matches(".full").trim_end_matches(".abstract");
            out.push(format!("https://{host}{base}.full.pdf"));
        }
    } else if host == "www.ncbi.nlm.nih.gov" || host == "pmc.ncbi.nlm.nih.gov" {
        if let Some(pmc) = path.split('/').find(|seg| seg.starts_with("PMC")) {
            let prefix = if host.starts_with("pmc.") { "" } else { "/pmc" };
            out.push(format!("https://{host}{prefix}/articles/{pmc}/pdf/"));
        }
    } else if host == "journals.plos.org" {
        if let Some(journal) = path.split('/').nth(1)
            && let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "id")
        {
            out.push(format!(
                "https://journals.plos.org/{journal}/article/file?id={id}&type=printable"
            ));
        }
    } else if host.ends_with("frontiersin.org") && path.contains("/articles/") {
        let base = path.trim_end_matches("/full").trim_end_matches("/abstract");
        out.push(format!("https://{host}{base}/pdf"));
    }

    out
}

/// PDF links found in a landing page: citation meta tags first, then anchors
/// whose path ends in `.pdf`. Relative links are resolved against `base_url`.
pub fn scrape_pdf_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let resolve = |href: &str| -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
            return None;
        }
        match &base {
            Some(b) => b.join(href).ok().map(|u| u.to_string()),
            None => Url::parse(href).ok().map(|u| u.to_string()),
        }
    };

    let mut out: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !out.contains(&url) {
            out.push(url);
        }
    };

    for meta in document.select(&META_PDF) {
        if let Some(url) = meta.value().attr("content").and_then(resolve) {
            push(url);
        }
    }
    for link in document.select(&LINK_PDF) {
        let Some(url) = link.value().attr("href").and_then(resolve) else {
            continue;
        };
        let is_pdf_path = Url::parse(&url)
            .map(|u| u.path().to_ascii_lowercase().ends_with(".pdf"))
            .unwrap_or(false);
        let typed = link.value().attr("type") == Some("application/pdf");
        if is_pdf_path || typed {
            push(url);
        }
    }
    out
}
