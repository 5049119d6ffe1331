//! PDF acquisition: candidate URL resolution, fetching, validation and
//! atomic persistence, keyed by citation key.

pub mod candidates;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use litscope_core::config::PDF_SUBDIR;
use litscope_core::storage::temp_path_for;
use litscope_core::{LibraryIndex, SearchResult};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::http::HttpFetch;
use crate::sources::PaperSource;

pub use candidates::{publisher_candidates, scrape_pdf_links};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No candidate URL could be found at all.
    NoPdfUrl,
    /// At least one candidate failed at the transport or HTTP-status level.
    AllCandidatesFailed,
    /// Every candidate answered, but none with a PDF.
    InvalidContent,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPdfUrl => "no_pdf_url",
            Self::AllCandidatesFailed => "all_candidates_failed",
            Self::InvalidContent => "invalid_content",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub citation_key: String,
    pub title: String,
    pub success: bool,
    /// Absolute path of the stored PDF.
    pub pdf_path: Option<PathBuf>,
    pub already_existed: bool,
    pub failure_reason: Option<FailureReason>,
    pub failure_message: Option<String>,
    pub attempted_urls: Vec<String>,
    /// Seconds spent, zero for the idempotent short-circuit.
    pub download_time: f64,
}

impl DownloadResult {
    fn existing(citation_key: &str, title: &str, path: PathBuf) -> Self {
        Self {
            citation_key: citation_key.to_string(),
            title: title.to_string(),
            success: true,
            pdf_path: Some(path),
            already_existed: true,
            failure_reason: None,
            failure_message: None,
            attempted_urls: Vec::new(),
            download_time: 0.0,
        }
    }

    fn failed(
        citation_key: &str,
        title: &str,
        reason: FailureReason,
        message: String,
        attempted_urls: Vec<String>,
        started: Instant,
    ) -> Self {
        Self {
            citation_key: citation_key.to_string(),
            title: title.to_string(),
            success: false,
            pdf_path: None,
            already_existed: false,
            failure_reason: Some(reason),
            failure_message: Some(message),
            attempted_urls,
            download_time: started.elapsed().as_secs_f64(),
        }
    }
}

/// Outcome of one candidate fetch.
enum Attempt {
    Stored(PathBuf),
    NotPdf,
    Failed(String),
}

enum LandingPage {
    Stored(PathBuf),
    Links(Vec<String>),
}

/// Tracks which candidates were tried and why they failed.
#[derive(Default)]
struct AttemptLog {
    urls: Vec<String>,
    seen: HashSet<String>,
    not_pdf: usize,
    errors: Vec<String>,
}

impl AttemptLog {
    /// Returns false when the URL was already tried.
    fn begin(&mut self, url: &str) -> bool {
        if !self.seen.insert(url.to_string()) {
            return false;
        }
        self.urls.push(url.to_string());
        true
    }
}

pub struct DownloadManager {
    library: Arc<LibraryIndex>,
    fetcher: Arc<dyn HttpFetch>,
    resolvers: Vec<Arc<dyn PaperSource>>,
    pdf_dir: PathBuf,
    key_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DownloadManager {
    /// PDFs are stored as `<pdf_dir>/{citation_key}.pdf`; `pdf_dir` is the
    /// `pdfs` directory of the data directory the library paths are relative to.
    pub fn new(
        library: Arc<LibraryIndex>,
        fetcher: Arc<dyn HttpFetch>,
        resolvers: Vec<Arc<dyn PaperSource>>,
        pdf_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            library,
            fetcher,
            resolvers,
            pdf_dir: pdf_dir.into(),
            key_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn pdf_dir(&self) -> &Path {
        &self.pdf_dir
    }

    pub fn pdf_path_for(&self, citation_key: &str) -> PathBuf {
        self.pdf_dir.join(format!("{citation_key}.pdf"))
    }

    /// Register the result in the library, then download its PDF.
    ///
    /// Errors are reserved for library persistence failures; a paper whose PDF
    /// cannot be obtained is an `Ok` result with `success == false`.
    pub async fn download_paper(&self, result: &SearchResult) -> Result<DownloadResult> {
        let outcome = self.library.add_or_update(result)?;
        self.download_for_key(&outcome.citation_key, result).await
    }

    /// Download the PDF for a paper already registered under `citation_key`.
    pub async fn download_for_key(
        &self,
        citation_key: &str,
        result: &SearchResult,
    ) -> Result<DownloadResult> {
        let lock = self.key_lock(citation_key);
        let outcome = {
            let _guard = lock.lock().await;
            self.download_locked(citation_key, result).await
        };
        self.release_key_lock(citation_key, lock);
        outcome
    }

    async fn download_locked(&self, citation_key: &str, result: &SearchResult) -> Result<DownloadResult> {
        let target = self.pdf_path_for(citation_key);
        if is_non_empty_file(&target).await {
            debug!(citation_key, path = %target.display(), "PDF already present");
            self.library
                .set_pdf_path(citation_key, &relative_pdf_path(citation_key))?;
            return Ok(DownloadResult::existing(citation_key, &result.title, target));
        }

        let started = Instant::now();
        let mut log = AttemptLog::default();

        // 1. declared pdf_url, falling back to the one remembered in the library
        let declared = result.pdf_url.clone().or_else(|| {
            self.library
                .get(citation_key)
                .and_then(|e| e.metadata.get("pdf_url").cloned())
        });
        if let Some(url) = declared.as_deref()
            && let Some(path) = self.try_candidate(citation_key, url, &target, &mut log).await
        {
            return self.finish(citation_key, result, path, log, started);
        }

        // 2. landing page: publisher templates, then the page itself
        if let Some(landing) = landing_url(result) {
            for url in publisher_candidates(&landing) {
                if let Some(path) = self.try_candidate(citation_key, &url, &target, &mut log).await {
                    return self.finish(citation_key, result, path, log, started);
                }
            }
            match self.visit_landing_page(citation_key, &landing, &target, &mut log).await {
                LandingPage::Stored(path) => {
                    return self.finish(citation_key, result, path, log, started);
                }
                LandingPage::Links(urls) => {
                    for url in urls {
                        if let Some(path) =
                            self.try_candidate(citation_key, &url, &target, &mut log).await
                        {
                            return self.finish(citation_key, result, path, log, started);
                        }
                    }
                }
            }
        }

        // 3. fallback resolvers
        for resolver in &self.resolvers {
            let urls = match resolver.resolve_pdf_urls(result).await {
                Ok(urls) => urls,
                Err(e) => {
                    debug!(citation_key, resolver = resolver.name(), error = %e, "resolver failed");
                    continue;
                }
            };
            for url in urls {
                if let Some(path) = self.try_candidate(citation_key, &url, &target, &mut log).await {
                    return self.finish(citation_key, result, path, log, started);
                }
            }
        }

        let failure = if log.urls.is_empty() {
            DownloadResult::failed(
                citation_key,
                &result.title,
                FailureReason::NoPdfUrl,
                "no candidate PDF URL found".to_string(),
                log.urls,
                started,
            )
        } else if log.errors.is_empty() {
            DownloadResult::failed(
                citation_key,
                &result.title,
                FailureReason::InvalidContent,
                format!("{} candidate(s) returned non-PDF content", log.not_pdf),
                log.urls,
                started,
            )
        } else {
            DownloadResult::failed(
                citation_key,
                &result.title,
                FailureReason::AllCandidatesFailed,
                log.errors.join("; "),
                log.urls,
                started,
            )
        };
        warn!(
            citation_key,
            reason = %failure.failure_reason.map(FailureReason::as_str).unwrap_or_default(),
            attempted = failure.attempted_urls.len(),
            "download failed"
        );
        Ok(failure)
    }

    /// Fetch the landing page. Some "landing" URLs serve the PDF directly, in
    /// which case it is stored and counted as an attempt.
    async fn visit_landing_page(
        &self,
        citation_key: &str,
        landing: &str,
        target: &Path,
        log: &mut AttemptLog,
    ) -> LandingPage {
        if log.seen.contains(landing) {
            return LandingPage::Links(Vec::new());
        }
        let page = match self.fetcher.fetch(landing).await {
            Ok(page) => page,
            Err(e) => {
                debug!(citation_key, url = landing, error = %e, "landing page unavailable");
                return LandingPage::Links(Vec::new());
            }
        };
        if !page.is_pdf() {
            return LandingPage::Links(scrape_pdf_links(&page.text(), &page.url));
        }

        log.begin(landing);
        match persist_pdf(target, &page.bytes).await {
            Ok(()) => LandingPage::Stored(target.to_path_buf()),
            Err(e) => {
                log.errors.push(format!("{landing}: could not store PDF: {e}"));
                LandingPage::Links(Vec::new())
            }
        }
    }

    async fn try_candidate(
        &self,
        citation_key: &str,
        url: &str,
        target: &Path,
        log: &mut AttemptLog,
    ) -> Option<PathBuf> {
        if !log.begin(url) {
            return None;
        }
        match self.fetch_candidate(url, target).await {
            Attempt::Stored(path) => Some(path),
            Attempt::NotPdf => {
                debug!(citation_key, url, "candidate is not a PDF");
                log.not_pdf += 1;
                None
            }
            Attempt::Failed(reason) => {
                debug!(citation_key, url, reason = %reason, "candidate failed");
                log.errors.push(format!("{url}: {reason}"));
                None
            }
        }
    }

    async fn fetch_candidate(&self, url: &str, target: &Path) -> Attempt {
        let resource = match self.fetcher.fetch(url).await {
            Ok(r) => r,
            Err(e) => return Attempt::Failed(e.to_string()),
        };
        if !resource.is_pdf() {
            return Attempt::NotPdf;
        }
        match persist_pdf(target, &resource.bytes).await {
            Ok(()) => Attempt::Stored(target.to_path_buf()),
            Err(e) => Attempt::Failed(format!("could not store PDF: {e}")),
        }
    }

    fn finish(
        &self,
        citation_key: &str,
        result: &SearchResult,
        path: PathBuf,
        log: AttemptLog,
        started: Instant,
    ) -> Result<DownloadResult> {
        self.library
            .set_pdf_path(citation_key, &relative_pdf_path(citation_key))?;
        let elapsed = started.elapsed().as_secs_f64();
        info!(
            citation_key,
            attempts = log.urls.len(),
            elapsed_secs = elapsed,
            "downloaded PDF"
        );
        Ok(DownloadResult {
            citation_key: citation_key.to_string(),
            title: result.title.clone(),
            success: true,
            pdf_path: Some(path),
            already_existed: false,
            failure_reason: None,
            failure_message: None,
            attempted_urls: log.urls,
            download_time: elapsed,
        })
    }

    fn key_lock(&self, citation_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(citation_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-key lock once no other task holds or waits on it.
    fn release_key_lock(&self, citation_key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(citation_key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(citation_key);
        }
    }
}

/// Library-relative location recorded in `LibraryEntry::pdf_path`.
pub fn relative_pdf_path(citation_key: &str) -> String {
    format!("{PDF_SUBDIR}/{citation_key}.pdf")
}

fn landing_url(result: &SearchResult) -> Option<String> {
    let url = result.url.trim();
    if !url.is_empty() && result.pdf_url.as_deref() != Some(url) {
        return Some(url.to_string());
    }
    result
        .normalized_doi()
        .map(|doi| format!("https://doi.org/{doi}"))
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Write to `{target}.part`, then rename into place.
async fn persist_pdf(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = temp_path_for(target, ".part");
    tokio::fs::write(&part, bytes).await?;
    if let Err(e) = tokio::fs::rename(&part, target).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScienceError;
    use crate::http::{FetchedResource, RateLimitedClient};
    use async_trait::async_trait;
    use mockito::Server;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\ntrailer\n<<>>\n%%EOF\n";

    /// Serves canned responses by URL and counts every request.
    #[derive(Default)]
    struct FakeFetcher {
        responses: HashMap<String, (Option<&'static str>, Vec<u8>)>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn with(mut self, url: &str, content_type: Option<&'static str>, body: &[u8]) -> Self {
            self.responses.insert(url.to_string(), (content_type, body.to_vec()));
            self
        }
    }

    #[async_trait]
    impl HttpFetch for FakeFetcher {
        async fn fetch(&self, url: &str) -> crate::error::Result<FetchedResource> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(url) {
                Some((ct, body)) => Ok(FetchedResource {
                    url: url.to_string(),
                    content_type: ct.map(str::to_string),
                    bytes: body.clone(),
                }),
                None => Err(ScienceError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    struct FixedResolver(Vec<String>);

    #[async_trait]
    impl PaperSource for FixedResolver {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn search(&self, _q: &str, _l: usize) -> crate::error::Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }
        async fn resolve_pdf_urls(&self, _r: &SearchResult) -> crate::error::Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn library(dir: &TempDir) -> Arc<LibraryIndex> {
        Arc::new(LibraryIndex::open(dir.path().join("library.json"), None).unwrap())
    }

    fn paper(pdf_url: Option<&str>, url: &str) -> SearchResult {
        SearchResult {
            title: "The free-energy principle: a unified brain theory?".into(),
            authors: vec!["Karl Friston".into()],
            year: Some(2010),
            url: url.into(),
            pdf_url: pdf_url.map(str::to_string),
            source: "test".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn second_download_makes_no_network_call() {
        let dir = TempDir::new().unwrap();
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/fep.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(PDF)
            .expect(1)
            .create_async()
            .await;
        let fetcher = RateLimitedClient::new(Duration::ZERO, 0, "litscope-test").unwrap();
        let lib = library(&dir);
        let manager = DownloadManager::new(
            lib.clone(),
            Arc::new(fetcher),
            vec![],
            dir.path().join(PDF_SUBDIR),
        );
        let result = paper(Some(&format!("{}/fep.pdf", server.url())), "");

        let first = manager.download_paper(&result).await.unwrap();
        let second = manager.download_paper(&result).await.unwrap();

        assert!(first.success);
        assert!(!first.already_existed);
        assert!(second.success);
        assert!(second.already_existed);
        assert!(second.attempted_urls.is_empty());
        m.assert_async().await;

        let entry = lib.get(&first.citation_key).unwrap();
        assert_eq!(entry.pdf_path.as_deref(), Some("pdfs/friston2010freeenergy.pdf"));
        assert_eq!(std::fs::read(manager.pdf_path_for(&first.citation_key)).unwrap(), PDF);
    }

    #[tokio::test]
    async fn no_candidates_reports_no_pdf_url() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        let manager = DownloadManager::new(
            library(&dir),
            fetcher.clone(),
            vec![],
            dir.path().join(PDF_SUBDIR),
        );

        let res = manager.download_paper(&paper(None, "")).await.unwrap();
        assert!(!res.success);
        assert_eq!(res.failure_reason, Some(FailureReason::NoPdfUrl));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn html_only_candidates_report_invalid_content() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(
            FakeFetcher::default().with("https://a.example/x.pdf", Some("text/html"), b"<html>paywall</html>"),
        );
        let manager = DownloadManager::new(
            library(&dir),
            fetcher,
            vec![],
            dir.path().join(PDF_SUBDIR),
        );

        let res = manager
            .download_paper(&paper(Some("https://a.example/x.pdf"), ""))
            .await
            .unwrap();
        assert_eq!(res.failure_reason, Some(FailureReason::InvalidContent));
        assert_eq!(res.attempted_urls, vec!["https://a.example/x.pdf".to_string()]);
    }

    #[tokio::test]
    async fn http_errors_report_all_candidates_failed() {
        let dir = TempDir::new().unwrap();
        let manager = DownloadManager::new(
            library(&dir),
            Arc::new(FakeFetcher::default()),
            vec![],
            dir.path().join(PDF_SUBDIR),
        );
        let res = manager
            .download_paper(&paper(Some("https://gone.example/x.pdf"), ""))
            .await
            .unwrap();
        assert_eq!(res.failure_reason, Some(FailureReason::AllCandidatesFailed));
        assert!(res.failure_message.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn falls_back_to_landing_page_links() {
        let dir = TempDir::new().unwrap();
        let landing = "https://pub.example/article/1";
        let html = br#"<html><head><meta name="citation_pdf_url" content="/files/1.pdf"></head></html>"#;
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with(landing, Some("text/html"), html)
                .with("https://pub.example/files/1.pdf", Some("application/pdf"), PDF),
        );
        let manager = DownloadManager::new(
            library(&dir),
            fetcher,
            vec![],
            dir.path().join(PDF_SUBDIR),
        );

        let res = manager
            .download_paper(&paper(Some("https://dead.example/x.pdf"), landing))
            .await
            .unwrap();
        assert!(res.success);
        assert_eq!(
            res.attempted_urls,
            vec![
                "https://dead.example/x.pdf".to_string(),
                "https://pub.example/files/1.pdf".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn resolver_is_last_resort() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default().with("https://oa.example/1.pdf", None, PDF));
        let resolver: Arc<dyn PaperSource> =
            Arc::new(FixedResolver(vec!["https://oa.example/1.pdf".into()]));
        let manager = DownloadManager::new(
            library(&dir),
            fetcher,
            vec![resolver],
            dir.path().join(PDF_SUBDIR),
        );

        let res = manager.download_paper(&paper(None, "")).await.unwrap();
        assert!(res.success);
        assert!(!dir.path().join("pdfs/friston2010freeenergy.pdf.part").exists());
    }

    #[tokio::test]
    async fn concurrent_downloads_of_same_paper_fetch_once() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default().with("https://a.example/x.pdf", None, PDF));
        let manager = Arc::new(DownloadManager::new(
            library(&dir),
            fetcher.clone(),
            vec![],
            dir.path().join(PDF_SUBDIR),
        ));
        let result = paper(Some("https://a.example/x.pdf"), "");

        let (a, b) = tokio::join!(manager.download_paper(&result), manager.download_paper(&result));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.success && b.success);
        assert!(a.already_existed != b.already_existed);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(manager.key_locks.lock().unwrap().is_empty());
    }
}
