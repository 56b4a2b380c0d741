use crate::config::{self, CrawlRenderer, SearchBackend, SearchConfig};
use crate::crawl::{Crawler, HttpPageLoader, PageLoader};
use crate::render_playwright::PlaywrightPageLoader;
use answerpipe_core::{
    Error, Result, SearchDepth, SearchImage, SearchOptions, SearchProvider, SearchResultImage,
    SearchResultItem, SearchResults,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Tavily rejects small pages; requests never ask for fewer than this.
const TAVILY_MIN_RESULTS: usize = 5;
const INCLUDE_IMAGE_DESCRIPTIONS: bool = true;
const SEARXNG_RESULTS_PER_PAGE: usize = 10;

fn transport_error(provider: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{provider} request timed out"))
    } else {
        Error::Search(format!("{provider}: {e}"))
    }
}

/// Replace whitespace runs in a URL with `%20`.
pub fn sanitize_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut in_ws = false;
    for ch in url.trim().chars() {
        if ch.is_whitespace() {
            if !in_ws {
                out.push_str("%20");
            }
            in_ws = true;
        } else {
            out.push(ch);
            in_ws = false;
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct TavilySearchProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl TavilySearchProvider {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: config::DEFAULT_TAVILY_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
    include_images: bool,
    include_image_descriptions: bool,
    include_answers: bool,
    include_domains: &'a [String],
    exclude_domains: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
    #[serde(default)]
    images: Vec<TavilyImage>,
    #[serde(default)]
    number_of_results: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    title: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TavilyImage {
    Url(String),
    Described {
        url: String,
        description: Option<String>,
    },
}

/// With descriptions on, keep only images that carry a non-empty description.
/// Otherwise keep every image as a bare URL.
fn process_tavily_images(images: Vec<TavilyImage>, with_descriptions: bool) -> Vec<SearchImage> {
    if with_descriptions {
        images
            .into_iter()
            .filter_map(|img| match img {
                TavilyImage::Described {
                    url,
                    description: Some(d),
                } if !d.is_empty() => Some(SearchImage::Described(SearchResultImage {
                    url: sanitize_url(&url),
                    description: Some(d),
                })),
                _ => None,
            })
            .collect()
    } else {
        images
            .into_iter()
            .map(|img| match img {
                TavilyImage::Url(u) | TavilyImage::Described { url: u, .. } => {
                    SearchImage::Url(sanitize_url(&u))
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SearchProvider for TavilySearchProvider {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, opts: &SearchOptions) -> Result<SearchResults> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured("TAVILY_API_KEY is not set in the environment".to_string())
        })?;

        let body = TavilyRequest {
            api_key,
            query: &opts.query,
            max_results: opts.max_results.max(TAVILY_MIN_RESULTS),
            search_depth: opts.search_depth.as_str(),
            include_images: true,
            include_image_descriptions: INCLUDE_IMAGE_DESCRIPTIONS,
            include_answers: true,
            include_domains: &opts.include_domains,
            exclude_domains: &opts.exclude_domains,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("tavily", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http {
                provider: "tavily".to_string(),
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let parsed: TavilySearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(format!("tavily: {e}")))?;

        let results: Vec<SearchResultItem> = parsed
            .results
            .into_iter()
            .map(|r| SearchResultItem {
                title: r.title.unwrap_or_default(),
                url: r.url,
                content: r.content.unwrap_or_default(),
            })
            .collect();

        Ok(SearchResults {
            number_of_results: parsed
                .number_of_results
                .unwrap_or(results.len() as u64),
            query: parsed.query.unwrap_or_else(|| opts.query.clone()),
            images: process_tavily_images(parsed.images, INCLUDE_IMAGE_DESCRIPTIONS),
            results,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExaSearchProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl ExaSearchProvider {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: config::DEFAULT_EXA_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaRequest<'a> {
    query: &'a str,
    num_results: usize,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    include_domains: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    exclude_domains: &'a [String],
    contents: ExaContents,
}

#[derive(Debug, Serialize)]
struct ExaContents {
    text: bool,
    highlights: bool,
}

#[derive(Debug, Deserialize)]
struct ExaSearchResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
struct ExaResult {
    url: String,
    title: Option<String>,
    text: Option<String>,
    #[serde(default)]
    highlights: Vec<String>,
}

#[async_trait::async_trait]
impl SearchProvider for ExaSearchProvider {
    fn name(&self) -> &'static str {
        "exa"
    }

    async fn search(&self, opts: &SearchOptions) -> Result<SearchResults> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured("EXA_API_KEY is not set in the environment".to_string())
        })?;

        let body = ExaRequest {
            query: &opts.query,
            num_results: opts.max_results,
            include_domains: &opts.include_domains,
            exclude_domains: &opts.exclude_domains,
            contents: ExaContents {
                text: true,
                highlights: true,
            },
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("exa", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http {
                provider: "exa".to_string(),
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let parsed: ExaSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(format!("exa: {e}")))?;

        let results: Vec<SearchResultItem> = parsed
            .results
            .into_iter()
            .map(|r| {
                let highlight = r.highlights.join(" ... ");
                SearchResultItem {
                    title: r.title.unwrap_or_default(),
                    url: r.url,
                    content: if highlight.trim().is_empty() {
                        r.text.unwrap_or_default()
                    } else {
                        highlight
                    },
                }
            })
            .collect();

        Ok(SearchResults {
            number_of_results: results.len() as u64,
            query: opts.query.clone(),
            images: Vec::new(),
            results,
        })
    }
}

pub struct SearxngSearchProvider {
    client: reqwest::Client,
    base_url: Option<String>,
    timeout: Duration,
    crawler: Arc<Crawler>,
}

impl SearxngSearchProvider {
    pub fn new(client: reqwest::Client, base_url: Option<String>, crawler: Arc<Crawler>) -> Self {
        Self {
            client,
            base_url: base_url.map(|b| b.trim().trim_end_matches('/').to_string()),
            timeout: config::SEARXNG_TIMEOUT,
            crawler,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint_search_for(base: &str) -> String {
        if base.ends_with("/search") {
            base.to_string()
        } else {
            format!("{base}/search")
        }
    }
}

/// Query string for one SearXNG request. Depth picks time range, safe search,
/// and engine breadth; `pageno` covers `max_results` at ten hits per page.
pub fn searxng_params(
    query: &str,
    depth: SearchDepth,
    max_results: usize,
) -> Vec<(&'static str, String)> {
    let (time_range, safesearch, engines) = match depth {
        SearchDepth::Advanced => ("", "0", "google,bing,duckduckgo,wikipedia"),
        SearchDepth::Basic => ("year", "1", "google,bing"),
    };
    let pageno = max_results.div_ceil(SEARXNG_RESULTS_PER_PAGE).max(1);
    vec![
        ("q", query.to_string()),
        ("format", "json".to_string()),
        ("categories", "general,images".to_string()),
        ("time_range", time_range.to_string()),
        ("safesearch", safesearch.to_string()),
        ("engines", engines.to_string()),
        ("pageno", pageno.to_string()),
    ]
}

/// Resolve a possibly-relative image source against the backend URL.
pub fn absolutize_image_src(base: &str, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    if src.starts_with("http") {
        return Some(src.to_string());
    }
    match url::Url::parse(base).and_then(|b| b.join(src)) {
        Ok(u) => Some(u.to_string()),
        Err(_) => Some(format!("{base}{src}")),
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    number_of_results: Option<f64>,
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearxngResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    img_src: Option<String>,
}

impl SearxngResult {
    fn is_image(&self) -> bool {
        self.img_src.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, opts: &SearchOptions) -> Result<SearchResults> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            Error::NotConfigured("SEARXNG_API_URL is not set in the environment".to_string())
        })?;
        let endpoint = Self::endpoint_search_for(base);
        let params = searxng_params(&opts.query, opts.search_depth, opts.max_results);
        tracing::debug!(%endpoint, ?params, "searxng request");

        let request = async {
            let resp = self
                .client
                .get(&endpoint)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(&params)
                .send()
                .await
                .map_err(|e| transport_error("searxng", e))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(status = status.as_u16(), %body, "searxng API error");
                return Err(Error::Http {
                    provider: "searxng".to_string(),
                    status: status.as_u16(),
                    message: body,
                });
            }
            resp.json::<SearxngSearchResponse>()
                .await
                .map_err(|e| Error::Search(format!("searxng: {e}")))
        };

        // Dropping the request future on deadline cancels the in-flight call.
        let parsed = match tokio::time::timeout(self.timeout, request).await {
            Ok(r) => r?,
            Err(_) => {
                tracing::error!(timeout_ms = self.timeout.as_millis() as u64, "searxng request timed out");
                return Err(Error::Timeout(format!(
                    "searxng request timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let (images, general): (Vec<SearxngResult>, Vec<SearxngResult>) =
            parsed.results.into_iter().partition(|r| r.is_image());

        let mut general: Vec<SearchResultItem> = general
            .into_iter()
            .map(|r| SearchResultItem {
                title: r.title,
                url: r.url,
                content: r.content,
            })
            .collect();

        if opts.search_depth == SearchDepth::Advanced {
            self.crawler.augment(&mut general, opts.max_results).await;
        }
        general.truncate(opts.max_results);

        let images = images
            .into_iter()
            .take(opts.max_results)
            .filter_map(|r| absolutize_image_src(base, r.img_src.as_deref().unwrap_or("")))
            .map(SearchImage::Url)
            .collect();

        Ok(SearchResults {
            results: general,
            images,
            query: parsed.query.unwrap_or_else(|| opts.query.clone()),
            number_of_results: parsed.number_of_results.unwrap_or(0.0).max(0.0) as u64,
        })
    }
}

/// Provider key -> adapter, with one active key resolved up front.
pub struct ProviderRegistry {
    providers: HashMap<SearchBackend, Arc<dyn SearchProvider>>,
    active: SearchBackend,
}

impl ProviderRegistry {
    pub fn new(active: SearchBackend) -> Self {
        Self {
            providers: HashMap::new(),
            active,
        }
    }

    pub fn register(mut self, key: SearchBackend, provider: Arc<dyn SearchProvider>) -> Self {
        self.providers.insert(key, provider);
        self
    }

    pub fn from_config(client: reqwest::Client, cfg: &SearchConfig) -> Self {
        let loader: Arc<dyn PageLoader> = match cfg.crawl_renderer {
            CrawlRenderer::Http => Arc::new(HttpPageLoader::new(client.clone())),
            CrawlRenderer::Playwright => Arc::new(PlaywrightPageLoader::default()),
        };
        let crawler = Arc::new(Crawler::new(loader));

        let mut tavily = TavilySearchProvider::new(client.clone(), cfg.tavily_api_key.clone());
        if let Some(ep) = &cfg.tavily_endpoint {
            tavily = tavily.with_endpoint(ep.clone());
        }
        let mut exa = ExaSearchProvider::new(client.clone(), cfg.exa_api_key.clone());
        if let Some(ep) = &cfg.exa_endpoint {
            exa = exa.with_endpoint(ep.clone());
        }
        let searxng = SearxngSearchProvider::new(client, cfg.searxng_api_url.clone(), crawler);

        Self::new(cfg.backend)
            .register(SearchBackend::Tavily, Arc::new(tavily))
            .register(SearchBackend::Exa, Arc::new(exa))
            .register(SearchBackend::Searxng, Arc::new(searxng))
    }

    pub fn active_key(&self) -> SearchBackend {
        self.active
    }

    pub fn active(&self) -> Result<Arc<dyn SearchProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            Error::NotConfigured(format!(
                "no search provider registered for {}",
                self.active.as_str()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::LoadedPage;
    use axum::{
        extract::Query,
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    struct NoPages;

    #[async_trait::async_trait]
    impl PageLoader for NoPages {
        fn name(&self) -> &'static str {
            "none"
        }
        async fn load(&self, url: &str) -> Result<LoadedPage> {
            Err(Error::Fetch(format!("offline: {url}")))
        }
    }

    fn no_crawl() -> Arc<Crawler> {
        Arc::new(Crawler::new(Arc::new(NoPages)))
    }

    #[test]
    fn sanitize_url_collapses_whitespace() {
        assert_eq!(sanitize_url("https://a/b c  d"), "https://a/b%20c%20d");
        assert_eq!(sanitize_url(" https://a "), "https://a");
    }

    #[test]
    fn described_images_drop_entries_without_description() {
        let imgs: Vec<TavilyImage> = serde_json::from_value(json!([
            {"url": "https://a/1.png", "description": "one"},
            {"url": "https://a/2.png", "description": ""},
            {"url": "https://a/3.png"},
            "https://a/4.png"
        ]))
        .unwrap();
        let out = process_tavily_images(imgs, true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url(), "https://a/1.png");
    }

    #[test]
    fn bare_images_keep_everything_sanitized() {
        let imgs: Vec<TavilyImage> =
            serde_json::from_value(json!(["https://a/x y.png", {"url": "https://a/z.png"}]))
                .unwrap();
        let out = process_tavily_images(imgs, false);
        assert_eq!(
            out,
            vec![
                SearchImage::Url("https://a/x%20y.png".to_string()),
                SearchImage::Url("https://a/z.png".to_string())
            ]
        );
    }

    #[test]
    fn searxng_params_follow_depth() {
        let basic = searxng_params("rust", SearchDepth::Basic, 10);
        assert!(basic.contains(&("time_range", "year".to_string())));
        assert!(basic.contains(&("safesearch", "1".to_string())));
        assert!(basic.contains(&("engines", "google,bing".to_string())));
        assert!(basic.contains(&("pageno", "1".to_string())));

        let adv = searxng_params("rust", SearchDepth::Advanced, 25);
        assert!(adv.contains(&("time_range", String::new())));
        assert!(adv.contains(&("safesearch", "0".to_string())));
        assert!(adv.contains(&("engines", "google,bing,duckduckgo,wikipedia".to_string())));
        assert!(adv.contains(&("pageno", "3".to_string())));
    }

    #[test]
    fn image_sources_are_absolutized() {
        let base = "http://searx.local:8080";
        assert_eq!(
            absolutize_image_src(base, "/image_proxy?u=1").as_deref(),
            Some("http://searx.local:8080/image_proxy?u=1")
        );
        assert_eq!(
            absolutize_image_src(base, "https://cdn/x.png").as_deref(),
            Some("https://cdn/x.png")
        );
        assert_eq!(absolutize_image_src(base, " "), None);
    }

    #[tokio::test]
    async fn tavily_forces_minimum_results_and_filters_images() {
        let seen: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
        let app = Router::new().route(
            "/search",
            post({
                let seen = seen.clone();
                move |Json(body): Json<serde_json::Value>| {
                    let seen = seen.clone();
                    async move {
                        *seen.lock().unwrap() = Some(body);
                        Json(json!({
                            "query": "cats ",
                            "results": (0..5).map(|i| json!({
                                "title": format!("Cat {i}"),
                                "url": format!("https://cats.example/{i}"),
                                "content": "meow",
                                "score": 0.9
                            })).collect::<Vec<_>>(),
                            "images": [
                                {"url": "https://img/1.png", "description": "a cat"},
                                {"url": "https://img/2.png", "description": "another cat"},
                                {"url": "https://img/3.png", "description": ""}
                            ]
                        }))
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let p = TavilySearchProvider::new(reqwest::Client::new(), Some("k".to_string()))
            .with_endpoint(format!("http://{addr}/search"));

        let mut opts = SearchOptions::new("cats ");
        opts.max_results = 2;
        let out = p.search(&opts).await.unwrap();

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["max_results"], 5);
        assert_eq!(body["api_key"], "k");
        assert_eq!(body["include_image_descriptions"], true);
        assert_eq!(body["search_depth"], "basic");
        assert_eq!(out.results.len(), 5);
        assert_eq!(out.number_of_results, 5);
        assert_eq!(out.images.len(), 2);
        assert!(out
            .images
            .iter()
            .all(|i| matches!(i, SearchImage::Described(d) if d.description.is_some())));
    }

    #[tokio::test]
    async fn tavily_missing_key_and_http_errors_fail() {
        let p = TavilySearchProvider::new(reqwest::Client::new(), None);
        let err = p.search(&SearchOptions::new("cats ")).await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));

        let app = Router::new().route(
            "/search",
            post(|| async { (StatusCode::UNAUTHORIZED, "nope").into_response() }),
        );
        let addr = serve(app).await;
        let p = TavilySearchProvider::new(reqwest::Client::new(), Some("k".to_string()))
            .with_endpoint(format!("http://{addr}/search"));
        let err = p.search(&SearchOptions::new("cats ")).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn exa_prefers_highlights_and_has_no_images() {
        let app = Router::new().route(
            "/search",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["numResults"], 3);
                assert_eq!(body["contents"]["highlights"], true);
                assert!(body.get("includeDomains").is_none());
                Json(json!({
                    "results": [
                        {"url": "https://a", "title": "A", "text": "full a", "highlights": ["hl a"]},
                        {"url": "https://b", "title": "B", "text": "full b", "highlights": []}
                    ]
                }))
            }),
        );
        let addr = serve(app).await;
        let p = ExaSearchProvider::new(reqwest::Client::new(), Some("k".to_string()))
            .with_endpoint(format!("http://{addr}/search"));
        let mut opts = SearchOptions::new("rust lang");
        opts.max_results = 3;
        let out = p.search(&opts).await.unwrap();
        assert_eq!(out.results[0].content, "hl a");
        assert_eq!(out.results[1].content, "full b");
        assert!(out.images.is_empty());
        assert_eq!(out.number_of_results, 2);
    }

    #[tokio::test]
    async fn exa_missing_key_is_not_configured() {
        let p = ExaSearchProvider::new(reqwest::Client::new(), None);
        let err = p.search(&SearchOptions::new("rust lang")).await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[tokio::test]
    async fn searxng_splits_general_and_image_hits() {
        let app = Router::new().route(
            "/search",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("format").map(String::as_str), Some("json"));
                assert_eq!(q.get("categories").map(String::as_str), Some("general,images"));
                Json(json!({
                    "query": q.get("q").cloned().unwrap_or_default(),
                    "number_of_results": 1234,
                    "results": [
                        {"url": "https://a", "title": "A", "content": "a"},
                        {"url": "https://i", "title": "I", "content": "", "img_src": "/img/1.png"},
                        {"url": "https://b", "title": "B", "content": "b"},
                        {"url": "https://j", "title": "J", "content": "", "img_src": "https://cdn/2.png"}
                    ]
                }))
            }),
        );
        let addr = serve(app).await;
        let base = format!("http://{addr}");
        let p = SearxngSearchProvider::new(reqwest::Client::new(), Some(base.clone()), no_crawl());
        let out = p.search(&SearchOptions::new("rust lang")).await.unwrap();
        assert_eq!(out.query, "rust lang");
        assert_eq!(out.number_of_results, 1234);
        assert_eq!(
            out.results.iter().map(|r| r.url.as_str()).collect::<Vec<_>>(),
            vec!["https://a", "https://b"]
        );
        assert_eq!(
            out.images,
            vec![
                SearchImage::Url(format!("{base}/img/1.png")),
                SearchImage::Url("https://cdn/2.png".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn searxng_advanced_crawls_and_isolates_failed_pages() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{addr}");
        let app = Router::new()
            .route(
                "/search",
                get({
                    let base = base.clone();
                    move |Query(q): Query<HashMap<String, String>>| {
                        let base = base.clone();
                        async move {
                            assert_eq!(q.get("safesearch").map(String::as_str), Some("0"));
                            Json(json!({
                                "query": "rust crawl",
                                "number_of_results": 3,
                                "results": [
                                    {"url": format!("{base}/p/1"), "title": "one", "content": "first"},
                                    {"url": format!("{base}/p/2"), "title": "two", "content": "second"},
                                    {"url": format!("{base}/p/3"), "title": "three", "content": "third"}
                                ]
                            }))
                        }
                    }
                }),
            )
            .route(
                "/p/1",
                get(|| async {
                    axum::response::Html("<html><head><title>One</title></head><body><p>page one</p></body></html>")
                }),
            )
            .route(
                "/p/2",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down").into_response() }),
            )
            .route(
                "/p/3",
                get(|| async {
                    axum::response::Html("<html><body><h1>Three</h1><li>item</li></body></html>")
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let crawler = Arc::new(Crawler::new(Arc::new(HttpPageLoader::new(client.clone()))));
        let p = SearxngSearchProvider::new(client, Some(base.clone()), crawler);
        let mut opts = SearchOptions::new("rust crawl");
        opts.search_depth = SearchDepth::Advanced;
        opts.max_results = 3;

        let out = p.search(&opts).await.unwrap();
        assert_eq!(out.results.len(), 3);
        assert_eq!(
            out.results[0].content,
            format!("first\n\nAdditional content:\nTitle: One\nURL: {base}/p/1\nContent:\npage one")
        );
        assert_eq!(out.results[1].content, "second");
        assert!(out.results[2]
            .content
            .starts_with("third\n\nAdditional content:\nTitle: \n"));
        assert!(out.results[2].content.ends_with("Three\nitem"));
    }

    #[tokio::test]
    async fn searxng_timeout_is_a_named_condition() {
        let app = Router::new().route(
            "/search",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"results": []}))
            }),
        );
        let addr = serve(app).await;
        let p = SearxngSearchProvider::new(
            reqwest::Client::new(),
            Some(format!("http://{addr}")),
            no_crawl(),
        )
        .with_timeout(Duration::from_millis(100));
        let err = p.search(&SearchOptions::new("slow query")).await.unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
    }

    #[tokio::test]
    async fn searxng_non_success_carries_body() {
        let app = Router::new().route(
            "/search",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response() }),
        );
        let addr = serve(app).await;
        let p = SearxngSearchProvider::new(
            reqwest::Client::new(),
            Some(format!("http://{addr}/")),
            no_crawl(),
        );
        match p.search(&SearchOptions::new("rust lang")).await {
            Err(Error::Http {
                status, message, ..
            }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn registry_resolves_active_provider() {
        let reg = ProviderRegistry::from_config(
            reqwest::Client::new(),
            &SearchConfig {
                backend: SearchBackend::Exa,
                ..Default::default()
            },
        );
        assert_eq!(reg.active().unwrap().name(), "exa");
        let empty = ProviderRegistry::new(SearchBackend::Searxng);
        assert!(matches!(empty.active(), Err(Error::NotConfigured(_))));
    }
}
