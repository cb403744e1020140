//! Page title lookup.
//!
//! [`TitleLookup`] is the seam the link resolver and the server depend on.
//! [`HttpTitleLookup`] fetches pages directly; [`RemoteTitleLookup`] asks a
//! running quill server's `/get_title` endpoint instead.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("URL must start with http:// or https://")]
    InvalidUrl,
    #[error("request timed out")]
    Timeout,
    #[error("could not connect to {0}")]
    Connect(String),
    #[error("page not found")]
    NotFound,
    #[error("access denied")]
    Forbidden,
    #[error("HTTP error: {0}")]
    Status(u16),
    #[error("page has no title")]
    NoTitle,
    #[error("request failed: {0}")]
    Request(String),
    #[error("{0}")]
    Service(String),
}

impl From<reqwest::Error> for TitleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TitleError::Timeout
        } else if err.is_connect() {
            TitleError::Connect(err.url().map(|u| u.to_string()).unwrap_or_default())
        } else if let Some(status) = err.status() {
            status_error(status.as_u16())
        } else {
            TitleError::Request(err.to_string())
        }
    }
}

fn status_error(code: u16) -> TitleError {
    match code {
        404 => TitleError::NotFound,
        403 => TitleError::Forbidden,
        other => TitleError::Status(other),
    }
}

/// Resolves a URL to the human-readable title of the page it points to.
///
/// Implementations are shared between concurrently running lookups.
#[async_trait]
pub trait TitleLookup: Send + Sync {
    async fn fetch_title(&self, url: &str) -> Result<String, TitleError>;
}

pub fn is_http_url(text: &str) -> bool {
    let text = text.trim();
    text.starts_with("http://") || text.starts_with("https://")
}

/// Fetches the page itself and reads `<title>`, `og:title` or the first `<h1>`.
#[derive(Debug, Clone)]
pub struct HttpTitleLookup {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
}

impl HttpTitleLookup {
    pub fn new(timeout: Duration) -> Self {
        Self::with_user_agent(timeout, USER_AGENT)
    }

    pub fn with_user_agent(timeout: Duration, user_agent: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            user_agent: user_agent.to_string(),
        }
    }
}

#[async_trait]
impl TitleLookup for HttpTitleLookup {
    async fn fetch_title(&self, url: &str) -> Result<String, TitleError> {
        if !is_http_url(url) {
            return Err(TitleError::InvalidUrl);
        }

        let resp = self
            .client
            .get(url.trim())
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8")
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16()));
        }

        let bytes = resp.bytes().await?;
        let html = String::from_utf8_lossy(&bytes);
        extract_title(&html).ok_or(TitleError::NoTitle)
    }
}

#[derive(Serialize)]
struct TitleRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TitleResponse {
    title: Option<String>,
    error: Option<String>,
}

/// Delegates to the `/get_title` endpoint of a quill server.
#[derive(Debug, Clone)]
pub struct RemoteTitleLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteTitleLookup {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:5000`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/get_title", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl TitleLookup for RemoteTitleLookup {
    async fn fetch_title(&self, url: &str) -> Result<String, TitleError> {
        if !is_http_url(url) {
            return Err(TitleError::InvalidUrl);
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&TitleRequest { url })
            .send()
            .await?;

        let ok = resp.status().is_success();
        let body: TitleResponse = resp.json().await.unwrap_or_default();
        match body.title {
            Some(title) if ok && !title.trim().is_empty() => Ok(title),
            _ => Err(TitleError::Service(
                body.error.unwrap_or_else(|| "could not read page title".to_string()),
            )),
        }
    }
}

fn title_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap())
}

fn og_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<meta[^>]*\bproperty\s*=\s*["']og:title["'][^>]*\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')|<meta[^>]*\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*\bproperty\s*=\s*["']og:title["']"#)
            .unwrap()
    })
}

fn h1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Pull a page title out of HTML: `<title>`, then `og:title`, then the first `<h1>`.
pub fn extract_title(html: &str) -> Option<String> {
    let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };

    let title_tag = title_tag_re()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| html_unescape(m.as_str()))
        .and_then(non_empty);
    if title_tag.is_some() {
        return title_tag;
    }

    let og_title = og_title_re()
        .captures(html)
        .and_then(|c| (1..=4).find_map(|i| c.get(i)))
        .map(|m| html_unescape(m.as_str()))
        .and_then(non_empty);
    if og_title.is_some() {
        return og_title;
    }

    h1_re()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| html_unescape(&tag_re().replace_all(m.as_str(), "")))
        .and_then(non_empty)
}

fn html_unescape(s: &str) -> String {
    let s = s
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    whitespace_re().replace_all(&s, " ").trim().to_string()
}
