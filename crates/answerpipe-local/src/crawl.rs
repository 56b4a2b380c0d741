//! Crawl-and-merge step for search hits: load each page plus a few same-site
//! pages it links to, pull readable text, and append it to the hit's snippet.

use crate::extract;
use answerpipe_core::{Error, Result, SearchResultItem};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Extracted text is capped per page.
pub const CRAWL_MAX_CHARS: usize = 1000;
/// Page loads allowed per requested result, shared across the whole crawl.
pub const PAGES_PER_RESULT: usize = 3;
pub const PAGE_DELIMITER: &str = "\n\n---\n\n";
pub const ADDITIONAL_CONTENT_HEADER: &str = "\n\nAdditional content:\n";

#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub url: String,
    pub title: String,
    pub html: String,
}

#[async_trait::async_trait]
pub trait PageLoader: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self, url: &str) -> Result<LoadedPage>;
}

#[derive(Debug, Clone)]
pub struct HttpPageLoader {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPageLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(20),
        }
    }
}

#[async_trait::async_trait]
impl PageLoader for HttpPageLoader {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn load(&self, url: &str) -> Result<LoadedPage> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http {
                provider: "crawl".to_string(),
                status: status.as_u16(),
                message: url.to_string(),
            });
        }
        let final_url = resp.url().to_string();
        let html = resp.text().await.map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(LoadedPage {
            title: extract::html_title(&html).unwrap_or_default(),
            url: final_url,
            html,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrawledPage {
    pub title: String,
    pub url: String,
    pub formatted_content: String,
}

pub fn format_page(title: &str, url: &str, text: &str) -> String {
    let (clipped, _) = extract::truncate_to_chars(text, CRAWL_MAX_CHARS);
    format!("Title: {title}\nURL: {url}\nContent:\n{clipped}")
        .trim()
        .to_string()
}

/// Shared page-load allowance for one crawl.
#[derive(Debug)]
struct PageBudget(AtomicUsize);

impl PageBudget {
    fn new(n: usize) -> Self {
        Self(AtomicUsize::new(n))
    }

    fn try_take(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct Crawler {
    loader: Arc<dyn PageLoader>,
    concurrency: usize,
}

impl Crawler {
    pub fn new(loader: Arc<dyn PageLoader>) -> Self {
        Self {
            loader,
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    fn crawled(page: LoadedPage) -> CrawledPage {
        let text = extract::readable_text(&page.html);
        CrawledPage {
            formatted_content: format_page(&page.title, &page.url, &text),
            title: page.title,
            url: page.url,
        }
    }

    pub async fn crawl_page(&self, url: &str) -> Result<CrawledPage> {
        Ok(Self::crawled(self.loader.load(url).await?))
    }

    /// The result page itself, then same-site pages it links to while the
    /// shared budget lasts. Only a failed result page fails the target.
    async fn crawl_target(&self, url: &str, budget: &PageBudget) -> Result<Vec<CrawledPage>> {
        let page = self.loader.load(url).await?;
        let links = extract::same_site_links(&page.html, &page.url);
        let mut pages = vec![Self::crawled(page)];
        for link in links {
            if !budget.try_take() {
                break;
            }
            match self.crawl_page(&link).await {
                Ok(p) => pages.push(p),
                Err(e) => tracing::debug!(url = %link, error = %e, "skipping linked page"),
            }
        }
        Ok(pages)
    }

    /// Crawl the first `max_results` items and append their page text.
    ///
    /// At most [`PAGES_PER_RESULT`] x `max_results` pages load in total. Each
    /// result page is loaded; what remains of the budget goes to pages they link
    /// to, joined per result with [`PAGE_DELIMITER`]. Targets run concurrently up
    /// to the crawler's concurrency. A failed result page is logged and leaves
    /// its item untouched; it never fails the batch.
    pub async fn augment(&self, items: &mut [SearchResultItem], max_results: usize) {
        let targets: Vec<(usize, String)> = items
            .iter()
            .take(max_results)
            .map(|r| r.url.clone())
            .enumerate()
            .collect();
        let budget = PageBudget::new(
            max_results
                .saturating_mul(PAGES_PER_RESULT)
                .saturating_sub(targets.len()),
        );

        let outcomes: Vec<(usize, String, Result<Vec<CrawledPage>>)> =
            futures_util::stream::iter(targets)
                .map(|(i, url)| {
                    let budget = &budget;
                    async move {
                        let r = self.crawl_target(&url, budget).await;
                        (i, url, r)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (i, url, outcome) in outcomes {
            match outcome {
                Ok(pages) => {
                    let additional = pages
                        .iter()
                        .map(|p| p.formatted_content.as_str())
                        .collect::<Vec<_>>()
                        .join(PAGE_DELIMITER);
                    if let Some(item) = items.get_mut(i) {
                        item.content.push_str(ADDITIONAL_CONTENT_HEADER);
                        item.content.push_str(&additional);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        %url,
                        loader = self.loader.name(),
                        error = %e,
                        "error crawling search result"
                    );
                }
            }
        }
    }
}
