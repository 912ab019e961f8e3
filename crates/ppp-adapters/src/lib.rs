//! Source gatherer contracts + page scraper, web search and manual-file gatherers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ppp_http::{FetchError, HttpFetcher, Url};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ppp-adapters";

pub const TAVILY_DEFAULT_BASE_URL: &str = "https://api.tavily.com";

/// Link fragments recognized as social profiles, keyed by the part before the first dot.
const SOCIAL_PATTERNS: [&str; 5] = [
    "facebook.com",
    "twitter.com",
    "linkedin.com",
    "instagram.com",
    "github.com",
];

const TEXT_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawSource {
    pub content: String,
    pub urls: Vec<String>,
}

impl RawSource {
    pub fn new(content: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            content: content.into(),
            urls,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherContext {
    pub run_id: Uuid,
}

#[derive(Debug, Error)]
pub enum GatherError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("{provider} search failed: {source}")]
    Search {
        provider: &'static str,
        #[source]
        source: FetchError,
    },
    #[error("decoding {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
    #[error("reading manual source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Message(String),
}

impl GatherError {
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch { source, .. } | Self::Search { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[async_trait]
pub trait SourceGatherer: Send + Sync {
    fn gatherer_id(&self) -> &'static str;

    fn applies_to(&self, _query: &str) -> bool {
        true
    }

    async fn gather(&self, ctx: &GatherContext, query: &str) -> Result<Vec<RawSource>, GatherError>;
}

pub fn is_profile_url(query: &str) -> bool {
    match Url::parse(query.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

// ------------------------------------------------------------
// Page scraper
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: Option<String>,
    pub text_content: String,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    /// Platform name to link, last link on the page wins.
    pub social_links: BTreeMap<String, String>,
}

impl ScrapedPage {
    /// Page metadata lines first, then the visible text.
    pub fn into_raw_source(self) -> RawSource {
        let mut lines = Vec::new();
        if let Some(title) = &self.title {
            lines.push(format!("Title: {title}"));
        }
        if let Some(description) = &self.meta_description {
            lines.push(format!("Description: {description}"));
        }
        if let Some(keywords) = &self.meta_keywords {
            lines.push(format!("Keywords: {keywords}"));
        }
        if !self.social_links.is_empty() {
            let links: Vec<_> = self
                .social_links
                .iter()
                .map(|(platform, url)| format!("{platform}: {url}"))
                .collect();
            lines.push(format!("Social profiles: {}", links.join(", ")));
        }

        let content = if lines.is_empty() {
            self.text_content
        } else if self.text_content.is_empty() {
            lines.join("\n")
        } else {
            format!("{}\n\n{}", lines.join("\n"), self.text_content)
        };
        RawSource {
            content,
            urls: vec![self.url],
        }
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn selector(css: &str) -> Result<Selector, GatherError> {
    Selector::parse(css).map_err(|e| GatherError::Message(e.to_string()))
}

fn select_first_text(document: &Html, css: &str) -> Result<Option<String>, GatherError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(&n.text().collect::<String>())))
}

fn select_all_texts(document: &Html, css: &str) -> Result<Vec<String>, GatherError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| text_or_none(&n.text().collect::<String>()))
        .collect())
}

fn select_first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, GatherError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(text_or_none))
}

fn social_links(document: &Html) -> Result<BTreeMap<String, String>, GatherError> {
    let sel = selector("a[href]")?;
    let mut links = BTreeMap::new();
    for href in document.select(&sel).filter_map(|a| a.value().attr("href")) {
        let href = href.trim().to_ascii_lowercase();
        for pattern in SOCIAL_PATTERNS {
            if href.contains(pattern) {
                let platform = pattern.split('.').next().unwrap_or(pattern);
                links.insert(platform.to_string(), href.clone());
            }
        }
    }
    Ok(links)
}

pub fn parse_page(url: &str, html: &str) -> Result<ScrapedPage, GatherError> {
    let document = Html::parse_document(html);
    Ok(ScrapedPage {
        url: url.to_string(),
        title: select_first_text(&document, "title")?,
        text_content: select_all_texts(&document, TEXT_SELECTOR)?.join(" "),
        meta_description: select_first_attr(&document, r#"meta[name="description"]"#, "content")?,
        meta_keywords: select_first_attr(&document, r#"meta[name="keywords"]"#, "content")?,
        social_links: social_links(&document)?,
    })
}

pub struct PageScraper {
    http: Arc<HttpFetcher>,
}

impl PageScraper {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self { http }
    }

    pub async fn scrape(&self, ctx: &GatherContext, url: &str) -> Result<ScrapedPage, GatherError> {
        let resp = self
            .http
            .get(ctx.run_id, url)
            .await
            .map_err(|source| GatherError::Fetch {
                url: url.to_string(),
                source,
            })?;
        parse_page(url, &resp.text())
    }
}

#[async_trait]
impl SourceGatherer for PageScraper {
    fn gatherer_id(&self) -> &'static str {
        "page-scraper"
    }

    fn applies_to(&self, query: &str) -> bool {
        is_profile_url(query)
    }

    async fn gather(&self, ctx: &GatherContext, query: &str) -> Result<Vec<RawSource>, GatherError> {
        let page = self.scrape(ctx, query.trim()).await?;
        debug!(
            url = %page.url,
            chars = page.text_content.len(),
            social_links = page.social_links.len(),
            "scraped page"
        );
        let source = page.into_raw_source();
        Ok(if source.is_blank() { Vec::new() } else { vec![source] })
    }
}

// ------------------------------------------------------------
// Web search (Tavily)
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_key: String,
    pub base_url: String,
    pub max_results: u32,
    pub search_depth: String,
}

impl SearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: TAVILY_DEFAULT_BASE_URL.to_string(),
            max_results: 5,
            search_depth: "advanced".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    include_answer: bool,
    include_raw_content: bool,
    max_results: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub raw_content: Option<String>,
}

impl SearchHit {
    fn best_text(&self) -> Option<&str> {
        [self.raw_content.as_deref(), self.content.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// Fold a search response into a single source; `None` when nothing usable came back.
///
/// Hits without a URL are skipped.
pub fn assemble_search_source(response: &SearchResponse) -> Option<RawSource> {
    let mut content = String::new();
    let mut urls = Vec::new();

    if let Some(answer) = response.answer.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        content.push_str(&format!("Summary: {answer}\n\n"));
    }

    for hit in &response.results {
        let url = hit.url.trim();
        if url.is_empty() {
            continue;
        }
        urls.push(url.to_string());
        if let Some(text) = hit.best_text() {
            content.push_str(&format!("\nContent from {url}:\n{text}\n"));
        }
    }

    if content.trim().is_empty() {
        None
    } else {
        Some(RawSource { content, urls })
    }
}

pub struct TavilySearcher {
    http: Arc<HttpFetcher>,
    config: SearchConfig,
}

impl TavilySearcher {
    pub fn new(http: Arc<HttpFetcher>, config: SearchConfig) -> Self {
        Self { http, config }
    }

    pub async fn search(&self, ctx: &GatherContext, query: &str) -> Result<SearchResponse, GatherError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let body = SearchRequest {
            api_key: &self.config.api_key,
            query,
            search_depth: &self.config.search_depth,
            include_answer: true,
            include_raw_content: true,
            max_results: self.config.max_results,
        };
        let resp = self
            .http
            .post_json(ctx.run_id, &url, Some(&self.config.api_key), &body)
            .await
            .map_err(|source| GatherError::Search {
                provider: "tavily",
                source,
            })?;
        resp.json().map_err(|e| GatherError::Decode {
            provider: "tavily",
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl SourceGatherer for TavilySearcher {
    fn gatherer_id(&self) -> &'static str {
        "tavily-search"
    }

    async fn gather(&self, ctx: &GatherContext, query: &str) -> Result<Vec<RawSource>, GatherError> {
        let response = self.search(ctx, query).await?;
        debug!(hits = response.results.len(), "search results received");
        Ok(assemble_search_source(&response).into_iter().collect())
    }
}

// ------------------------------------------------------------
// Manual sources
// ------------------------------------------------------------

pub struct ManualSourceGatherer {
    paths: Vec<PathBuf>,
}

impl ManualSourceGatherer {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl SourceGatherer for ManualSourceGatherer {
    fn gatherer_id(&self) -> &'static str {
        "manual"
    }

    fn applies_to(&self, _query: &str) -> bool {
        !self.paths.is_empty()
    }

    async fn gather(&self, _ctx: &GatherContext, _query: &str) -> Result<Vec<RawSource>, GatherError> {
        let mut sources = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| GatherError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            let source = RawSource::new(content, vec![format!("file://{}", path.display())]);
            if !source.is_blank() {
                sources.push(source);
            }
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use axum::routing::{get, post};
    use axum::{Json, Router};
    use ppp_http::{BackoffPolicy, HttpClientConfig};
    use tokio::net::TcpListener;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    fn fixture(rel: &str) -> String {
        let path = workspace_root().join("fixtures").join(rel);
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
    }

    fn search_fixture() -> SearchResponse {
        serde_json::from_str(&fixture("search/tavily_ada_lovelace.json")).expect("fixture json")
    }

    fn ctx() -> GatherContext {
        GatherContext {
            run_id: Uuid::new_v4(),
        }
    }

    fn fetcher() -> Arc<HttpFetcher> {
        Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(5),
                backoff: BackoffPolicy::none(),
                ..Default::default()
            })
            .expect("client"),
        )
    }

    async fn spawn(router: Router) -> String {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    #[test]
    fn url_detection_only_accepts_absolute_web_urls() {
        assert!(is_profile_url("https://example.com/about"));
        assert!(is_profile_url("  http://blog.example.org  "));
        assert!(!is_profile_url("Ada Lovelace"));
        assert!(!is_profile_url("ftp://example.com/file"));
        assert!(!is_profile_url("mailto:ada@example.com"));
        assert!(!is_profile_url("example.com"));
    }

    #[test]
    fn page_parser_collects_visible_text_meta_and_social_links() {
        let page = parse_page("https://ada.example", &fixture("pages/ada_lovelace.html"))
            .expect("parse");

        assert_eq!(page.title.as_deref(), Some("Ada Lovelace | Analyst & Writer"));
        assert_eq!(
            page.text_content,
            "Ada Lovelace Ada is a mathematician working with Charles Babbage on the Analytical Engine. \
             Interests Poetical science Mechanical computation"
        );
        assert_eq!(
            page.meta_description.as_deref(),
            Some("Mathematician and writer, known for her notes on the Analytical Engine.")
        );
        assert_eq!(
            page.meta_keywords.as_deref(),
            Some("mathematics, analytical engine, computing")
        );
        assert_eq!(
            page.social_links.get("twitter").map(String::as_str),
            Some("https://twitter.com/ada_lovelace")
        );
        assert!(page.social_links.contains_key("linkedin"));
        assert!(page.social_links.contains_key("github"));
        assert!(!page.social_links.contains_key("facebook"));

        let source = page.into_raw_source();
        assert_eq!(source.urls, vec!["https://ada.example".to_string()]);
        assert!(source.content.starts_with(
            "Title: Ada Lovelace | Analyst & Writer\n\
             Description: Mathematician and writer, known for her notes on the Analytical Engine.\n\
             Keywords: mathematics, analytical engine, computing\n\
             Social profiles: github: https://github.com/ada, "
        ));
        assert!(source.content.contains("twitter: https://twitter.com/ada_lovelace"));
        assert!(source.content.ends_with("\n\nAda Lovelace Ada is a mathematician working with Charles Babbage on the Analytical Engine. \
             Interests Poetical science Mechanical computation"));
    }

    #[test]
    fn bare_page_keeps_only_its_text() {
        let page = parse_page("https://ada.example", "<html><body><p>Only text.</p></body></html>")
            .expect("parse");
        assert_eq!(page.into_raw_source().content, "Only text.");
    }

    #[test]
    fn search_response_folds_into_one_source() {
        let source = assemble_search_source(&search_fixture()).expect("content present");

        assert!(source.content.starts_with("Summary: Ada Lovelace was an English mathematician"));
        assert!(source
            .content
            .contains("Content from https://en.wikipedia.org/wiki/Ada_Lovelace:\nAugusta Ada King"));
        assert!(source.content.contains(
            "Content from https://www.biography.com/scientists/ada-lovelace:\nAda Lovelace wrote"
        ));
        assert!(!source.content.contains("Short snippet"));
        assert_eq!(
            source.urls,
            vec![
                "https://en.wikipedia.org/wiki/Ada_Lovelace".to_string(),
                "https://www.biography.com/scientists/ada-lovelace".to_string(),
            ]
        );
    }

    #[test]
    fn empty_search_response_yields_no_source() {
        assert_eq!(assemble_search_source(&SearchResponse::default()), None);
        let only_blank = SearchResponse {
            answer: Some("  ".into()),
            results: vec![SearchHit {
                url: String::new(),
                content: Some("orphan".into()),
                ..Default::default()
            }],
        };
        assert_eq!(assemble_search_source(&only_blank), None);
    }

    #[tokio::test]
    async fn scraper_gathers_only_for_url_queries() {
        let html = fixture("pages/ada_lovelace.html");
        let router = Router::new().route("/ada", get(move || async move { axum::response::Html(html) }));
        let base = spawn(router).await;
        let scraper = PageScraper::new(fetcher());
        let url = format!("{base}/ada");

        assert!(scraper.applies_to(&url));
        assert!(!scraper.applies_to("Ada Lovelace"));

        let sources = scraper.gather(&ctx(), &url).await.expect("gather");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].urls, vec![url]);
        assert!(sources[0].content.contains("Poetical science"));
    }

    #[tokio::test]
    async fn scraper_reports_http_failures() {
        let router = Router::new().route(
            "/gone",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
        );
        let base = spawn(router).await;

        let err = PageScraper::new(fetcher())
            .gather(&ctx(), &format!("{base}/gone"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatherError::Fetch { .. }));
        assert_eq!(err.fetch_error().and_then(FetchError::status), Some(404));
    }

    #[tokio::test]
    async fn tavily_searcher_posts_query_and_assembles_source() {
        let canned = fixture("search/tavily_ada_lovelace.json");
        let router = Router::new().route(
            "/search",
            post(move |Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["query"], "Ada Lovelace");
                assert_eq!(body["include_raw_content"], true);
                assert_eq!(body["max_results"], 5);
                let value: serde_json::Value = serde_json::from_str(&canned).expect("canned json");
                Json(value)
            }),
        );
        let base = spawn(router).await;
        let mut config = SearchConfig::new("tvly-test");
        config.base_url = base;

        let searcher = TavilySearcher::new(fetcher(), config);
        assert!(searcher.applies_to("https://en.wikipedia.org/wiki/Ada_Lovelace"));
        assert!(searcher.applies_to("Ada Lovelace"));

        let sources = searcher
            .gather(&ctx(), "Ada Lovelace")
            .await
            .expect("search");

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].urls.len(), 2);
    }

    #[tokio::test]
    async fn manual_gatherer_reads_files_and_skips_blank_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bio = dir.path().join("bio.txt");
        let blank = dir.path().join("blank.txt");
        std::fs::write(&bio, "Ada Lovelace, mathematician.").expect("write bio");
        std::fs::write(&blank, "  \n").expect("write blank");

        let gatherer = ManualSourceGatherer::new(vec![bio.clone(), blank]);
        assert!(gatherer.applies_to("anything"));
        let sources = gatherer.gather(&ctx(), "Ada Lovelace").await.expect("gather");

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].urls, vec![format!("file://{}", bio.display())]);
        assert!(!ManualSourceGatherer::new(Vec::new()).applies_to("Ada"));
    }
}
