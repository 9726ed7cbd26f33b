// src/crawler/fetcher.rs
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::models::{CrawlError, PageResult, PageStatus};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; ContactCrawler/1.0)";

/// What a rendered page boils down to for this crawler.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    /// Decoded page body. Kept as raw HTML so the extractor can tell
    /// script/style content from visible text.
    pub text: String,
    pub links: Vec<String>,
}

/// Capability contract for the browser-automation backend. The core
/// never touches the concrete backend, so tests run on a fake and a
/// real headless-browser backend can be slotted in without changes.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, CrawlError>;
}

/// One browser session. Owned by a single worker for one organization,
/// never shared, so cookies and storage cannot leak across organizations.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, CrawlError>;
}

/// Default backend: plain HTTP fetch + HTML parse. Each session gets
/// its own client (and therefore its own connection/cookie state).
pub struct HttpBackend;

#[async_trait]
impl RenderBackend for HttpBackend {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CrawlError::SessionFailure(format!("client build failed: {}", e)))?;
        Ok(Box::new(HttpSession { client }))
    }
}

struct HttpSession {
    client: Client,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, CrawlError> {
        debug!("Fetching: {}", url);

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrawlError::NavigationTimeout {
                        url: url.to_string(),
                    }
                } else {
                    CrawlError::SessionFailure(format!("request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(CrawlError::SessionFailure(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::NavigationTimeout {
                    url: url.to_string(),
                }
            } else {
                CrawlError::SessionFailure(format!("body read failed: {}", e))
            }
        })?;
        debug!("Fetched {} bytes from {}", body.len(), url);

        let links = extract_links(&body, &final_url);
        Ok(RenderedPage {
            final_url,
            text: body,
            links,
        })
    }
}

pub(crate) fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();
    let base = Url::parse(base_url).ok();

    let mut links = Vec::new();
    for element in document.select(&selector) {
        if let Some(href) = element.value().attr("href") {
            let resolved = match Url::parse(href) {
                Ok(url) => Some(url),
                Err(_) => base.as_ref().and_then(|b| b.join(href).ok()),
            };
            if let Some(url) = resolved {
                links.push(url.to_string());
            }
        }
    }
    links
}

/// Drives one session against one task at a time, absorbing failures
/// into `PageResult` statuses so a bad page never kills the worker.
pub struct Fetcher {
    backend: Arc<dyn RenderBackend>,
    session: Option<Box<dyn BrowserSession>>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(backend: Arc<dyn RenderBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            session: None,
            timeout,
        }
    }

    /// Fetches a page. Timeouts drop the task; a session failure gets
    /// exactly one retry on a fresh session before the task is marked
    /// as an error.
    pub async fn fetch(&mut self, url: &str) -> PageResult {
        match self.navigate(url).await {
            Ok(page) => PageResult {
                url: url.to_string(),
                final_url: page.final_url,
                status: PageStatus::Ok,
                raw_text: page.text,
                outbound_links: page.links,
            },
            Err(CrawlError::NavigationTimeout { .. }) => {
                warn!("Navigation timed out for {}, dropping task", url);
                PageResult::failed(url, PageStatus::Timeout)
            }
            Err(CrawlError::SessionFailure(reason)) => {
                warn!("Session failed on {} ({}), retrying with fresh session", url, reason);
                self.session = None;

                match self.navigate(url).await {
                    Ok(page) => PageResult {
                        url: url.to_string(),
                        final_url: page.final_url,
                        status: PageStatus::Ok,
                        raw_text: page.text,
                        outbound_links: page.links,
                    },
                    Err(CrawlError::NavigationTimeout { .. }) => {
                        warn!("Retry timed out for {}, dropping task", url);
                        PageResult::failed(url, PageStatus::Timeout)
                    }
                    Err(e) => {
                        warn!("Retry failed for {}: {}", url, e);
                        self.session = None;
                        PageResult::failed(url, PageStatus::Error)
                    }
                }
            }
            Err(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                PageResult::failed(url, PageStatus::Error)
            }
        }
    }

    async fn navigate(&mut self, url: &str) -> Result<RenderedPage, CrawlError> {
        if self.session.is_none() {
            self.session = Some(self.backend.new_session().await?);
        }
        let session = self.session.as_mut().unwrap();

        // Hard deadline on top of whatever the backend enforces itself.
        match tokio::time::timeout(self.timeout, session.navigate(url, self.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(CrawlError::NavigationTimeout {
                url: url.to_string(),
            }),
        }
    }
}
