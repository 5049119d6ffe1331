use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use litscope_core::config::DownloadConfig;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Result, ScienceError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

// ─── HttpFetch ────────────────────────────────────────────────────────────────

/// Body and headers of a successful GET.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// URL after redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedResource {
    pub fn has_pdf_magic(&self) -> bool {
        has_pdf_magic(&self.bytes)
    }

    pub fn declares_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/pdf"))
    }

    pub fn looks_like_html(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("html"));
        let head = String::from_utf8_lossy(&self.bytes[..self.bytes.len().min(512)]).to_lowercase();
        declared || head.contains("<html") || head.contains("<!doctype html")
    }

    /// A response is taken as a PDF when the magic bytes are present, or when the
    /// server says `application/pdf` and the body is not obviously HTML.
    pub fn is_pdf(&self) -> bool {
        !self.bytes.is_empty() && (self.has_pdf_magic() || (self.declares_pdf() && !self.looks_like_html()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// `%PDF` within the first kilobyte; some servers prepend whitespace or junk.
pub fn has_pdf_magic(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(1024)]
        .windows(4)
        .any(|w| w == b"%PDF")
}

/// Raw GET with bounded retry. The download path depends on this seam only.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource>;
}

// ─── RateLimitedClient ────────────────────────────────────────────────────────

pub struct RateLimitedClient {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
    max_retries: u32,
    backoff_base: Duration,
    max_retry_wait: Duration,
}

impl RateLimitedClient {
    pub fn new(min_interval: Duration, max_retries: u32, user_agent: &str) -> Result<Self> {
        Self::with_timeout(min_interval, max_retries, user_agent, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        min_interval: Duration,
        max_retries: u32,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
            max_retries,
            backoff_base: Duration::from_secs(1),
            max_retry_wait: Duration::from_secs(DEFAULT_RETRY_AFTER_SECS),
        })
    }

    pub fn from_config(config: &DownloadConfig) -> Result<Self> {
        Self::with_timeout(
            Duration::from_millis(config.min_interval_ms),
            config.max_retries,
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Base delay for exponential backoff on transport errors and 5xx responses.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Upper bound on a server-requested `Retry-After` wait.
    pub fn with_max_retry_wait(mut self, max: Duration) -> Self {
        self.max_retry_wait = max;
        self
    }

    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        self.get_with_headers(url, HeaderMap::new()).await
    }

    pub async fn get_with_headers(&self, url: &str, headers: HeaderMap) -> Result<String> {
        let resp = self.send_with_retry(url, headers).await?;
        resp.text().await.map_err(ScienceError::Http)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get_json_with_headers(url, HeaderMap::new()).await
    }

    pub async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<T> {
        let text = self.get_with_headers(url, headers).await?;
        serde_json::from_str(&text).map_err(|e| ScienceError::Parse(e.to_string()))
    }

    /// GET with rate limiting. Retries 429 (honouring `Retry-After`), 5xx and
    /// transport errors up to `max_retries` times; other statuses fail at once.
    async fn send_with_retry(&self, url: &str, headers: HeaderMap) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            self.wait_for_rate_limit().await;
            let resp = self.client.get(url).headers(headers.clone()).send().await;
            match resp {
                Ok(r) if r.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = r
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    if attempt >= self.max_retries {
                        return Err(ScienceError::RateLimit(host_of(url), wait));
                    }
                    let wait = Duration::from_secs(wait).min(self.max_retry_wait);
                    warn!(url, attempt, wait_secs = wait.as_secs(), "rate limited, backing off");
                    sleep(wait).await;
                    attempt += 1;
                }
                Ok(r) if r.status().is_server_error() => {
                    let status = r.status().as_u16();
                    if attempt >= self.max_retries {
                        return Err(ScienceError::Status {
                            url: url.to_string(),
                            status,
                        });
                    }
                    debug!(url, status, attempt, "server error, retrying");
                    sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
                Ok(r) if !r.status().is_success() => {
                    return Err(ScienceError::Status {
                        url: url.to_string(),
                        status: r.status().as_u16(),
                    });
                }
                Ok(r) => return Ok(r),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(ScienceError::Http(e));
                    }
                    debug!(url, attempt, error = %e, "request failed, retrying");
                    sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

#[async_trait]
impl HttpFetch for RateLimitedClient {
    async fn fetch(&self, url: &str) -> Result<FetchedResource> {
        let resp = self.send_with_retry(url, HeaderMap::new()).await?;
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let bytes = resp.bytes().await?.to_vec();
        Ok(FetchedResource {
            url: final_url,
            content_type,
            bytes,
        })
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToOwned::to_owned))
        .unwrap_or_else(|| url.to_string())
}
