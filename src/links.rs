//! Rewriting pasted text so bare URLs become titled anchors.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::title::TitleLookup;

/// One URL found in a paste, after its title lookup settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMatch {
    pub url: String,
    /// Page title on success, the URL itself otherwise.
    pub resolved_title: String,
    pub succeeded: bool,
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

/// Distinct `http(s)://` URLs in `text`, in first-seen order.
pub fn find_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in url_re().find_iter(text) {
        if !urls.iter().any(|u| u == m.as_str()) {
            urls.push(m.as_str().to_string());
        }
    }
    urls
}

/// The URL itself when `text`, trimmed, is exactly one URL.
pub fn single_url(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    url_re()
        .find(trimmed)
        .filter(|m| m.start() == 0 && m.end() == trimmed.len())
        .map(|m| m.as_str())
}

/// Anchor markup for a link; only `"` in the URL is escaped.
///
/// The display text goes in verbatim, so a fetched title carrying markup is
/// inserted as markup.
pub fn anchor_markup(url: &str, text: &str) -> String {
    format!(
        r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
        url.replace('"', "&quot;"),
        text
    )
}

/// Replace every occurrence of each URL with its anchor, longest URL first.
///
/// The text is scanned once and inserted markup is never revisited, so a URL
/// that prefixes a longer one cannot land inside the longer one's anchor.
/// Text between URL runs is copied through untouched.
fn replace_links(text: &str, matches: &[UrlMatch]) -> String {
    let mut ordered: Vec<&UrlMatch> = matches.iter().filter(|m| !m.url.is_empty()).collect();
    ordered.sort_by(|a, b| b.url.len().cmp(&a.url.len()));

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for hit in url_re().find_iter(text) {
        out.push_str(&text[last..hit.start()]);
        link_run(&mut out, hit.as_str(), &ordered);
        last = hit.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Rewrite one whitespace-free run that starts with a URL.
///
/// URLs hold no whitespace, so every occurrence lies inside such a run and
/// starts with `http`.
fn link_run(out: &mut String, run: &str, ordered: &[&UrlMatch]) {
    let mut rest = run;
    while !rest.is_empty() {
        if let Some(m) = ordered.iter().find(|m| rest.starts_with(m.url.as_str())) {
            out.push_str(&anchor_markup(&m.url, &m.resolved_title));
            rest = &rest[m.url.len()..];
            continue;
        }
        let first = rest.chars().next().map_or(1, char::len_utf8);
        let skip = rest[first..].find("http").map_or(rest.len(), |i| i + first);
        out.push_str(&rest[..skip]);
        rest = &rest[skip..];
    }
}

/// Turns URLs in pasted text into anchors titled through a [`TitleLookup`].
#[derive(Clone)]
pub struct LinkResolver {
    lookup: Arc<dyn TitleLookup>,
}

impl LinkResolver {
    pub fn new(lookup: Arc<dyn TitleLookup>) -> Self {
        Self { lookup }
    }

    /// Look up every URL concurrently and wait until all have settled.
    ///
    /// Results keep the order of `urls`. Failures, empty titles and panicked
    /// lookups fall back to the URL as display text.
    pub async fn resolve_titles(&self, urls: &[String]) -> Vec<UrlMatch> {
        let tasks: Vec<_> = urls
            .iter()
            .map(|url| {
                let lookup = Arc::clone(&self.lookup);
                let url = url.clone();
                tokio::spawn(async move {
                    let result = lookup.fetch_title(&url).await;
                    (url, result)
                })
            })
            .collect();

        let mut matches = Vec::with_capacity(tasks.len());
        for (task, url) in tasks.into_iter().zip(urls) {
            let resolved = match task.await {
                Ok((url, Ok(title))) if !title.trim().is_empty() => {
                    debug!(%url, %title, "resolved link title");
                    UrlMatch {
                        url,
                        resolved_title: title,
                        succeeded: true,
                    }
                }
                Ok((url, Ok(_))) => {
                    warn!(%url, "title lookup returned an empty title, using URL");
                    fallback(url)
                }
                Ok((url, Err(e))) => {
                    warn!(%url, error = %e, "title lookup failed, using URL");
                    fallback(url)
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "title lookup task failed, using URL");
                    fallback(url.clone())
                }
            };
            matches.push(resolved);
        }
        matches
    }

    /// Rewrite every URL in `text` into an anchor titled with its page title.
    ///
    /// Text without URLs comes back unchanged and no lookup is made.
    pub async fn rewrite_urls_in_text(&self, text: &str) -> String {
        let urls = find_urls(text);
        if urls.is_empty() {
            return text.to_string();
        }

        debug!(count = urls.len(), "resolving titles for pasted URLs");
        let matches = self.resolve_titles(&urls).await;
        replace_links(text, &matches)
    }

    /// Handle a paste into the editing surface.
    ///
    /// Returns `None` when the paste holds no URL and should go through
    /// untouched. A paste that is a single URL while text is selected links
    /// the selection without any lookup.
    pub async fn rewrite_paste(&self, text: &str, selected_text: &str) -> Option<String> {
        if let Some(url) = single_url(text) {
            if !selected_text.is_empty() {
                return Some(anchor_markup(url, selected_text));
            }
            let url = url.to_string();
            let resolved = self.resolve_titles(std::slice::from_ref(&url)).await;
            let title = resolved
                .into_iter()
                .next()
                .map_or_else(|| url.clone(), |m| m.resolved_title);
            return Some(anchor_markup(&url, &title));
        }

        if find_urls(text).is_empty() {
            return None;
        }
        Some(self.rewrite_urls_in_text(text).await)
    }
}

fn fallback(url: String) -> UrlMatch {
    UrlMatch {
        resolved_title: url.clone(),
        url,
        succeeded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::title::TitleError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    enum Reply {
        Title(&'static str, u64),
        Fail(u64),
        Panic,
    }

    struct FakeLookup {
        replies: HashMap<&'static str, Reply>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn new(replies: Vec<(&'static str, Reply)>) -> Arc<Self> {
            Arc::new(Self {
                replies: replies.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TitleLookup for FakeLookup {
        async fn fetch_title(&self, url: &str) -> Result<String, TitleError> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.replies.get(url) {
                Some(Reply::Title(title, delay)) => {
                    tokio::time::sleep(Duration::from_millis(*delay)).await;
                    Ok(title.to_string())
                }
                Some(Reply::Fail(delay)) => {
                    tokio::time::sleep(Duration::from_millis(*delay)).await;
                    Err(TitleError::NotFound)
                }
                Some(Reply::Panic) => panic!("lookup blew up"),
                None => Err(TitleError::NoTitle),
            }
        }
    }

    fn resolver(lookup: &Arc<FakeLookup>) -> LinkResolver {
        LinkResolver::new(lookup.clone())
    }

    #[test]
    fn finds_distinct_urls_in_order() {
        let text = "see https://b.com and http://a.com, then https://b.com again";
        assert_eq!(find_urls(text), vec!["https://b.com", "http://a.com,"]);
    }

    #[test]
    fn scheme_is_required() {
        assert!(find_urls("www.example.com and example.com/x ftp://x.org").is_empty());
    }

    #[test]
    fn single_url_detection() {
        assert_eq!(single_url("  https://a.com/x \n"), Some("https://a.com/x"));
        assert_eq!(single_url("https://a.com more"), None);
        assert_eq!(single_url("go https://a.com"), None);
        assert_eq!(single_url(""), None);
    }

    #[test]
    fn anchor_escapes_quotes_in_href_only() {
        assert_eq!(
            anchor_markup(r#"http://a.com/"x""#, r#"say "hi""#),
            r#"<a href="http://a.com/&quot;x&quot;" target="_blank" rel="noopener noreferrer">say "hi"</a>"#
        );
    }

    #[tokio::test]
    async fn text_without_urls_is_unchanged() {
        let lookup = FakeLookup::new(vec![]);
        let text = "plain text, no links: example.com";
        assert_eq!(resolver(&lookup).rewrite_urls_in_text(text).await, text);
        assert_eq!(resolver(&lookup).rewrite_paste(text, "").await, None);
        assert_eq!(resolver(&lookup).rewrite_urls_in_text("").await, "");
        assert!(lookup.calls().is_empty());
    }

    #[tokio::test]
    async fn single_url_is_looked_up_once() {
        let lookup = FakeLookup::new(vec![("https://rust-lang.org", Reply::Title("Rust", 0))]);
        let out = resolver(&lookup).rewrite_paste("https://rust-lang.org\n", "").await;
        assert_eq!(out.as_deref(), Some(anchor_markup("https://rust-lang.org", "Rust").as_str()));
        assert_eq!(lookup.calls(), vec!["https://rust-lang.org"]);
    }

    #[tokio::test]
    async fn single_url_failure_falls_back_to_url() {
        let lookup = FakeLookup::new(vec![("https://gone.example", Reply::Fail(0))]);
        let out = resolver(&lookup).rewrite_paste("https://gone.example", "").await;
        assert_eq!(
            out.as_deref(),
            Some(anchor_markup("https://gone.example", "https://gone.example").as_str())
        );
    }

    #[tokio::test]
    async fn selection_becomes_link_text_without_lookup() {
        let lookup = FakeLookup::new(vec![("https://a.com", Reply::Title("A", 0))]);
        let out = resolver(&lookup).rewrite_paste(" https://a.com ", "my words").await;
        assert_eq!(out.as_deref(), Some(anchor_markup("https://a.com", "my words").as_str()));
        assert!(lookup.calls().is_empty());
    }

    #[tokio::test]
    async fn selection_is_ignored_for_mixed_text() {
        let lookup = FakeLookup::new(vec![("https://a.com", Reply::Title("A", 0))]);
        let out = resolver(&lookup).rewrite_paste("read https://a.com", "sel").await;
        assert_eq!(out, Some(format!("read {}", anchor_markup("https://a.com", "A"))));
    }

    #[tokio::test]
    async fn prefix_urls_are_not_garbled() {
        let lookup = FakeLookup::new(vec![
            ("http://a.com", Reply::Title("Short", 0)),
            ("http://a.com/b", Reply::Title("Long", 0)),
        ]);
        let text = "x http://a.com y http://a.com/b z http://a.com";
        let out = resolver(&lookup).rewrite_urls_in_text(text).await;
        assert_eq!(
            out,
            format!(
                "x {} y {} z {}",
                anchor_markup("http://a.com", "Short"),
                anchor_markup("http://a.com/b", "Long"),
                anchor_markup("http://a.com", "Short"),
            )
        );
    }

    #[tokio::test]
    async fn repeated_urls_are_looked_up_once_and_all_replaced() {
        let lookup = FakeLookup::new(vec![("https://a.com", Reply::Title("A", 0))]);
        let out = resolver(&lookup)
            .rewrite_urls_in_text("https://a.com https://a.com")
            .await;
        let anchor = anchor_markup("https://a.com", "A");
        assert_eq!(out, format!("{} {}", anchor, anchor));
        assert_eq!(lookup.calls().len(), 1);
    }

    #[tokio::test]
    async fn lookups_run_concurrently() {
        let lookup = FakeLookup::new(vec![
            ("https://slow.one", Reply::Title("One", 300)),
            ("https://slow.two", Reply::Title("Two", 300)),
            ("https://broken.example", Reply::Fail(0)),
        ]);
        let text = "https://slow.one https://slow.two https://broken.example";

        let started = Instant::now();
        let out = resolver(&lookup).rewrite_urls_in_text(text).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
        assert_eq!(
            out,
            format!(
                "{} {} {}",
                anchor_markup("https://slow.one", "One"),
                anchor_markup("https://slow.two", "Two"),
                anchor_markup("https://broken.example", "https://broken.example"),
            )
        );
    }

    #[tokio::test]
    async fn resolve_titles_reports_success_per_url() {
        let lookup = FakeLookup::new(vec![
            ("https://ok.example", Reply::Title("Fine", 0)),
            ("https://blank.example", Reply::Title("   ", 0)),
            ("https://panics.example", Reply::Panic),
        ]);
        let urls: Vec<String> = ["https://ok.example", "https://blank.example", "https://panics.example"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let matches = resolver(&lookup).resolve_titles(&urls).await;

        assert_eq!(matches.len(), 3);
        assert!(matches[0].succeeded);
        assert_eq!(matches[0].resolved_title, "Fine");
        for m in &matches[1..] {
            assert!(!m.succeeded);
            assert_eq!(m.resolved_title, m.url);
        }
    }

    #[tokio::test]
    async fn quote_in_title_stays_outside_href() {
        let lookup = FakeLookup::new(vec![("https://q.example", Reply::Title(r#"A "quoted" title"#, 0))]);
        let out = resolver(&lookup).rewrite_urls_in_text("https://q.example").await;
        assert!(out.starts_with(r#"<a href="https://q.example" target="_blank""#));
        assert!(out.contains(r#">A "quoted" title</a>"#));
    }

    #[tokio::test]
    async fn multibyte_text_around_urls_survives() {
        let lookup = FakeLookup::new(vec![("https://a.com", Reply::Title("A", 0))]);
        let out = resolver(&lookup).rewrite_urls_in_text("链接：https://a.com 好").await;
        assert_eq!(out, format!("链接：{} 好", anchor_markup("https://a.com", "A")));
    }

    fn matched(url: &str, title: &str) -> UrlMatch {
        UrlMatch {
            url: url.to_string(),
            resolved_title: title.to_string(),
            succeeded: true,
        }
    }

    #[test]
    fn runs_are_rewritten_inside_and_gaps_copied() {
        let matches = vec![matched("http://a.com", "A"), matched("http://a.com/b", "AB")];
        let out = replace_links("go http://a.com/b,http://a.com! done", &matches);
        assert_eq!(
            out,
            format!(
                "go {},{}! done",
                anchor_markup("http://a.com/b", "AB"),
                anchor_markup("http://a.com", "A")
            )
        );
    }

    #[test]
    fn large_paste_replaces_every_url() {
        let urls: Vec<String> = (0..500).map(|i| format!("https://site{}.example/p", i)).collect();
        let matches: Vec<UrlMatch> = urls.iter().map(|u| matched(u, "T")).collect();
        let text: String = urls
            .iter()
            .map(|u| format!("filler text with no links {} ", u))
            .collect();

        let out = replace_links(&text, &matches);
        assert_eq!(out.matches("<a href=").count(), 500);
        assert_eq!(out.matches("filler text with no links ").count(), 500);
        assert!(out.contains(&anchor_markup("https://site499.example/p", "T")));
    }
}
