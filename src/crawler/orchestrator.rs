// src/crawler/orchestrator.rs
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CrawlerConfig, ExtractionConfig};
use crate::crawler::extractor::EmailExtractor;
use crate::crawler::fetcher::{Fetcher, RenderBackend};
use crate::crawler::frontier::Frontier;
use crate::crawler::scope::{is_contact_related, normalize_url, ScopePolicy};
use crate::database::{self, DbPool};
use crate::models::{
    CrawlError, CrawlSummary, CrawlTask, EmailCandidate, OrgStatus, PageStatus, Result, Seed,
};

/// Drives crawls for a batch of organizations.
///
/// Organizations run as independent tasks; a global semaphore bounds
/// the total number of live browser sessions across all of them.
pub struct Orchestrator {
    crawler_config: CrawlerConfig,
    extraction_config: ExtractionConfig,
    backend: Arc<dyn RenderBackend>,
    db_pool: DbPool,
    sessions: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

/// State shared by the workers of a single organization's crawl.
struct OrgState {
    organization_id: String,
    frontier: Mutex<Frontier>,
    in_flight: AtomicUsize,
    wakeup: Notify,
    cancelled: AtomicBool,
    emails_found: AtomicU32,
}

impl Orchestrator {
    pub fn new(
        crawler_config: CrawlerConfig,
        extraction_config: ExtractionConfig,
        backend: Arc<dyn RenderBackend>,
        db_pool: DbPool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let sessions = Arc::new(Semaphore::new(crawler_config.max_concurrent_sessions));
        Self {
            crawler_config,
            extraction_config,
            backend,
            db_pool,
            sessions,
            shutdown,
        }
    }

    /// Crawls every seed to completion. A fatal condition in one
    /// organization never touches the others; each gets a summary.
    pub async fn run(&self, seeds: Vec<Seed>) -> Result<Vec<CrawlSummary>> {
        info!("🕷️  Starting crawl batch: {} organizations", seeds.len());

        let mut joins = JoinSet::new();
        for seed in seeds {
            let orchestrator = self.clone_handles();
            joins.spawn(async move { orchestrator.crawl_organization(seed).await });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!("Organization crawl task panicked: {}", e),
            }
        }

        let ok = summaries
            .iter()
            .filter(|s| s.status == OrgStatus::Completed)
            .count();
        info!(
            "🏁 Crawl batch done: {}/{} organizations completed cleanly",
            ok,
            summaries.len()
        );
        Ok(summaries)
    }

    fn clone_handles(&self) -> OrgRunner {
        OrgRunner {
            crawler_config: self.crawler_config.clone(),
            extraction_config: self.extraction_config.clone(),
            backend: Arc::clone(&self.backend),
            db_pool: self.db_pool.clone(),
            sessions: Arc::clone(&self.sessions),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Per-organization slice of the orchestrator, moved into its task.
struct OrgRunner {
    crawler_config: CrawlerConfig,
    extraction_config: ExtractionConfig,
    backend: Arc<dyn RenderBackend>,
    db_pool: DbPool,
    sessions: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

impl OrgRunner {
    /// State machine: Pending -> Running -> {Completed, Exhausted, Aborted}.
    async fn crawl_organization(self, seed: Seed) -> CrawlSummary {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let org = seed.organization_id.clone();
        debug!("Organization {} is pending (run {})", org, run_id);

        let summary = match self.try_crawl(&seed, &run_id, started).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("❌ Crawl failed for {}: {}", org, e);
                CrawlSummary {
                    run_id: run_id.clone(),
                    organization_id: org.clone(),
                    status: OrgStatus::Aborted,
                    pages_crawled: 0,
                    emails_found: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        if let Err(e) = database::record_crawl_run(&self.db_pool, &summary).await {
            warn!("Failed to record crawl run for {}: {}", org, e);
        }

        info!(
            "🎯 {}: {} ({} pages, {} new emails, {}ms)",
            summary.organization_id,
            summary.status.as_str(),
            summary.pages_crawled,
            summary.emails_found,
            summary.duration_ms
        );
        summary
    }

    async fn try_crawl(
        &self,
        seed: &Seed,
        run_id: &str,
        started: Instant,
    ) -> std::result::Result<CrawlSummary, CrawlError> {
        let scope = Arc::new(ScopePolicy::new(seed)?);
        let root = normalize_url(&seed.root_url).map_err(|e| CrawlError::InvalidSeed {
            organization_id: seed.organization_id.clone(),
            reason: format!("root URL does not normalize: {}", e),
        })?;

        let mut frontier = Frontier::new(seed.max_pages);
        frontier.enqueue(
            CrawlTask {
                organization_id: seed.organization_id.clone(),
                url: root,
                depth: 0,
            },
            false,
        );

        let state = Arc::new(OrgState {
            organization_id: seed.organization_id.clone(),
            frontier: Mutex::new(frontier),
            in_flight: AtomicUsize::new(0),
            wakeup: Notify::new(),
            cancelled: AtomicBool::new(false),
            emails_found: AtomicU32::new(0),
        });

        let deadline = seed.timeout_seconds.map(|s| started + Duration::from_secs(s));
        let extractor = Arc::new(EmailExtractor::new(self.extraction_config.clone()));

        info!(
            "Organization {} running: root={} depth<={} pages<={}",
            seed.organization_id, seed.root_url, seed.max_depth, seed.max_pages
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.crawler_config.workers_per_org.max(1) {
            let ctx = WorkerCtx {
                state: Arc::clone(&state),
                scope: Arc::clone(&scope),
                extractor: Arc::clone(&extractor),
                backend: Arc::clone(&self.backend),
                db_pool: self.db_pool.clone(),
                sessions: Arc::clone(&self.sessions),
                shutdown: self.shutdown.clone(),
                fetch_timeout: Duration::from_secs(self.crawler_config.fetch_timeout_seconds),
                delay_ms: self.crawler_config.delay_ms,
                deadline,
            };
            workers.spawn(async move { worker_loop(worker_id, ctx).await });
        }
        while workers.join_next().await.is_some() {}

        let mut frontier = state.frontier.lock().unwrap();
        let status = if state.cancelled.load(Ordering::SeqCst) {
            let dropped = frontier.discard_remaining();
            debug!(
                "{}: aborted with {} queued tasks discarded",
                seed.organization_id, dropped
            );
            OrgStatus::Aborted
        } else if frontier.budget_exhausted() && frontier.had_budget_pressure() {
            let dropped = frontier.discard_remaining();
            debug!(
                "{}: page budget reached, {} queued tasks discarded",
                seed.organization_id, dropped
            );
            OrgStatus::Exhausted
        } else {
            OrgStatus::Completed
        };

        Ok(CrawlSummary {
            run_id: run_id.to_string(),
            organization_id: seed.organization_id.clone(),
            status,
            pages_crawled: frontier.dispatched(),
            emails_found: state.emails_found.load(Ordering::SeqCst),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

struct WorkerCtx {
    state: Arc<OrgState>,
    scope: Arc<ScopePolicy>,
    extractor: Arc<EmailExtractor>,
    backend: Arc<dyn RenderBackend>,
    db_pool: DbPool,
    sessions: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    fetch_timeout: Duration,
    delay_ms: u64,
    deadline: Option<Instant>,
}

impl WorkerCtx {
    fn cancel_requested(&self) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Atomically dequeues the next task (dequeue marks the URL visited
    /// under the frontier lock, so no URL dispatches twice). Returns
    /// None when the crawl is over for this worker: frontier drained
    /// with nothing in flight, or cancellation.
    async fn next_task(&self) -> Option<CrawlTask> {
        loop {
            if self.cancel_requested() {
                let frontier = self.state.frontier.lock().unwrap();
                if !frontier.is_empty() || self.state.in_flight.load(Ordering::SeqCst) > 0 {
                    self.state.cancelled.store(true, Ordering::SeqCst);
                }
                self.state.wakeup.notify_waiters();
                return None;
            }

            {
                let mut frontier = self.state.frontier.lock().unwrap();
                match frontier.dequeue() {
                    Ok(task) => {
                        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
                        return Some(task);
                    }
                    Err(CrawlError::FrontierEmpty) => {
                        if self.state.in_flight.load(Ordering::SeqCst) == 0 {
                            // Normal completion signal, not an error.
                            return None;
                        }
                    }
                    Err(_) => return None,
                }
            }

            // Frontier is empty but another worker may still enqueue;
            // the sleep arm covers a wakeup lost between check and wait.
            tokio::select! {
                _ = self.state.wakeup.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    fn finish_task(&self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.wakeup.notify_waiters();
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerCtx) {
    // Holding a permit for the worker's lifetime bounds total live
    // sessions across all organizations.
    let _permit = match Arc::clone(&ctx.sessions).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    let mut fetcher = Fetcher::new(Arc::clone(&ctx.backend), ctx.fetch_timeout);
    debug!(
        "Worker {} up for organization {}",
        worker_id, ctx.state.organization_id
    );

    while let Some(task) = ctx.next_task().await {
        process_task(&ctx, &mut fetcher, &task).await;
        ctx.finish_task();

        if ctx.delay_ms > 0 {
            let jitter = fastrand::u64(0..=ctx.delay_ms / 4);
            tokio::time::sleep(Duration::from_millis(ctx.delay_ms + jitter)).await;
        }
    }

    debug!(
        "Worker {} done for organization {}",
        worker_id, ctx.state.organization_id
    );
}

async fn process_task(ctx: &WorkerCtx, fetcher: &mut Fetcher, task: &CrawlTask) {
    debug!(
        "Crawling {} (depth {}) for {}",
        task.url, task.depth, task.organization_id
    );
    let page = fetcher.fetch(task.url.as_str()).await;

    match page.status {
        PageStatus::Ok => {}
        PageStatus::Timeout => {
            warn!("Skipped {} (timeout)", page.url);
            return;
        }
        PageStatus::Error => {
            warn!("Skipped {} (fetch error)", page.url);
            return;
        }
    }

    // Candidates get organization and source context attached here.
    for extracted in ctx.extractor.extract(&page.raw_text) {
        let candidate = EmailCandidate {
            organization_id: task.organization_id.clone(),
            address: extracted.address,
            source_url: page.final_url.clone(),
            confidence: extracted.confidence,
        };
        match database::insert_email(&ctx.db_pool, &candidate).await {
            Ok(true) => {
                ctx.state.emails_found.fetch_add(1, Ordering::SeqCst);
                info!(
                    "📧 {} found for {} on {}",
                    candidate.address, candidate.organization_id, candidate.source_url
                );
            }
            Ok(false) => {} // first-seen-wins, duplicate dropped
            Err(e) => warn!("Failed to store {}: {}", candidate.address, e),
        }
    }

    // Scope-filter outbound links back into the frontier.
    let mut accepted = 0usize;
    {
        let mut frontier = ctx.state.frontier.lock().unwrap();
        for link in &page.outbound_links {
            let Ok(normalized) = normalize_url(link) else {
                continue;
            };
            if !ctx.scope.in_scope(&normalized, task.depth) {
                continue;
            }
            let priority = is_contact_related(&normalized);
            frontier.enqueue(
                CrawlTask {
                    organization_id: task.organization_id.clone(),
                    url: normalized,
                    depth: task.depth + 1,
                },
                priority,
            );
            accepted += 1;
        }
    }
    if accepted > 0 {
        ctx.state.wakeup.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crawler::fetcher::{BrowserSession, RenderedPage};
    use crate::database::create_db_pool;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Backend serving a fixed URL -> HTML map and recording every
    /// navigation it is asked for.
    struct FakeBackend {
        pages: HashMap<String, String>,
        visits: Arc<Mutex<Vec<String>>>,
    }

    struct FakeSession {
        pages: HashMap<String, String>,
        visits: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RenderBackend for FakeBackend {
        async fn new_session(&self) -> std::result::Result<Box<dyn BrowserSession>, CrawlError> {
            Ok(Box::new(FakeSession {
                pages: self.pages.clone(),
                visits: Arc::clone(&self.visits),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(
            &mut self,
            url: &str,
            _timeout: Duration,
        ) -> std::result::Result<RenderedPage, CrawlError> {
            self.visits.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(html) => {
                    let links = crate::crawler::fetcher::extract_links(html, url);
                    Ok(RenderedPage {
                        final_url: url.to_string(),
                        text: html.clone(),
                        links,
                    })
                }
                None => Err(CrawlError::SessionFailure(format!("no page for {}", url))),
            }
        }
    }

    struct AlwaysTimeoutBackend;
    struct AlwaysTimeoutSession;

    #[async_trait]
    impl RenderBackend for AlwaysTimeoutBackend {
        async fn new_session(&self) -> std::result::Result<Box<dyn BrowserSession>, CrawlError> {
            Ok(Box::new(AlwaysTimeoutSession))
        }
    }

    #[async_trait]
    impl BrowserSession for AlwaysTimeoutSession {
        async fn navigate(
            &mut self,
            url: &str,
            _timeout: Duration,
        ) -> std::result::Result<RenderedPage, CrawlError> {
            Err(CrawlError::NavigationTimeout {
                url: url.to_string(),
            })
        }
    }

    fn seed(org: &str, root: &str, max_depth: u32, max_pages: u32) -> Seed {
        Seed {
            organization_id: org.to_string(),
            root_url: root.to_string(),
            max_depth,
            max_pages,
            timeout_seconds: None,
        }
    }

    fn test_configs() -> (CrawlerConfig, ExtractionConfig) {
        let mut config = Config::default();
        config.crawler.delay_ms = 0;
        config.crawler.workers_per_org = 2;
        (config.crawler, config.extraction)
    }

    async fn orchestrator_with(
        backend: Arc<dyn RenderBackend>,
    ) -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db_pool(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let (crawler_config, extraction_config) = test_configs();
        let (_tx, rx) = watch::channel(false);
        (
            dir,
            Orchestrator::new(crawler_config, extraction_config, backend, pool, rx),
        )
    }

    #[tokio::test]
    async fn end_to_end_contact_discovery() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example-org.test/".to_string(),
            r#"<a href="/contact">Contact</a> <a href="https://b.com/page">partner</a>"#
                .to_string(),
        );
        pages.insert(
            "https://example-org.test/contact".to_string(),
            "Reach us at hello@example-org.test or visit hello@2x.png".to_string(),
        );

        let visits = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(FakeBackend {
            pages,
            visits: Arc::clone(&visits),
        });
        let (_dir, orchestrator) = orchestrator_with(backend).await;

        let summaries = orchestrator
            .run(vec![seed("org-1", "https://example-org.test", 1, 10)])
            .await
            .unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, OrgStatus::Completed);

        let records = database::export_emails(&orchestrator.db_pool, Some("org-1"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, "hello@example-org.test");
        assert_eq!(
            records[0].first_source_url,
            "https://example-org.test/contact"
        );

        // the cross-domain link never got fetched
        let visited = visits.lock().unwrap();
        assert!(visited.iter().all(|u| !u.contains("b.com")));
    }

    #[tokio::test]
    async fn timeouts_complete_with_zero_records() {
        let (_dir, orchestrator) = orchestrator_with(Arc::new(AlwaysTimeoutBackend)).await;

        let summaries = orchestrator
            .run(vec![seed("org-1", "https://example-org.test", 1, 10)])
            .await
            .unwrap();

        assert_eq!(summaries[0].status, OrgStatus::Completed);
        assert_eq!(summaries[0].emails_found, 0);

        let records = database::export_emails(&orchestrator.db_pool, None)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn no_url_is_visited_twice() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://a.test/".to_string(),
            r#"<a href="/">home</a> <a href="/about">about</a>"#.to_string(),
        );
        pages.insert(
            "https://a.test/about".to_string(),
            r#"<a href="/">back home</a> team@a.test"#.to_string(),
        );

        let visits = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(FakeBackend {
            pages,
            visits: Arc::clone(&visits),
        });
        let (_dir, orchestrator) = orchestrator_with(backend).await;

        let summaries = orchestrator
            .run(vec![seed("org-1", "https://a.test", 3, 10)])
            .await
            .unwrap();
        assert_eq!(summaries[0].status, OrgStatus::Completed);

        let visited = visits.lock().unwrap();
        let mut sorted = visited.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), visited.len(), "a URL was fetched twice");
        assert_eq!(summaries[0].pages_crawled as usize, visited.len());
    }

    #[tokio::test]
    async fn page_budget_exhausts_the_crawl() {
        let mut pages = HashMap::new();
        let links: String = (0..10)
            .map(|i| format!(r#"<a href="/page-{}">p{}</a>"#, i, i))
            .collect();
        pages.insert("https://a.test/".to_string(), links);
        for i in 0..10 {
            pages.insert(format!("https://a.test/page-{}", i), "no emails".to_string());
        }

        let visits = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(FakeBackend {
            pages,
            visits: Arc::clone(&visits),
        });
        let (_dir, orchestrator) = orchestrator_with(backend).await;

        let summaries = orchestrator
            .run(vec![seed("org-1", "https://a.test", 2, 3)])
            .await
            .unwrap();

        assert_eq!(summaries[0].status, OrgStatus::Exhausted);
        assert_eq!(summaries[0].pages_crawled, 3);
        assert!(visits.lock().unwrap().len() <= 3);
    }

    #[tokio::test]
    async fn invalid_seed_does_not_block_other_organizations() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://good.test/".to_string(),
            "contact: sales@good.test".to_string(),
        );

        let visits = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(FakeBackend {
            pages,
            visits: Arc::clone(&visits),
        });
        let (_dir, orchestrator) = orchestrator_with(backend).await;

        let summaries = orchestrator
            .run(vec![
                seed("bad-org", "not a url at all", 1, 10),
                seed("good-org", "https://good.test", 1, 10),
            ])
            .await
            .unwrap();

        let bad = summaries
            .iter()
            .find(|s| s.organization_id == "bad-org")
            .unwrap();
        let good = summaries
            .iter()
            .find(|s| s.organization_id == "good-org")
            .unwrap();
        assert_eq!(bad.status, OrgStatus::Aborted);
        assert_eq!(good.status, OrgStatus::Completed);
        assert_eq!(good.emails_found, 1);
    }

    #[tokio::test]
    async fn shutdown_signal_aborts_running_crawl() {
        let mut pages = HashMap::new();
        let links: String = (0..50)
            .map(|i| format!(r#"<a href="/page-{}">p{}</a>"#, i, i))
            .collect();
        pages.insert("https://a.test/".to_string(), links);
        for i in 0..50 {
            pages.insert(format!("https://a.test/page-{}", i), "nothing".to_string());
        }

        let visits = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(FakeBackend {
            pages,
            visits: Arc::clone(&visits),
        });

        let dir = tempfile::tempdir().unwrap();
        let pool = create_db_pool(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let (mut crawler_config, extraction_config) = test_configs();
        crawler_config.delay_ms = 20;
        let (tx, rx) = watch::channel(false);
        let orchestrator = Orchestrator::new(crawler_config, extraction_config, backend, pool, rx);

        let seeds = vec![seed("org-1", "https://a.test", 2, 100)];
        let run = orchestrator.run(seeds);
        tokio::pin!(run);

        let summaries = tokio::select! {
            result = &mut run => result.unwrap(),
            _ = tokio::time::sleep(Duration::from_millis(60)) => {
                tx.send(true).unwrap();
                run.await.unwrap()
            }
        };

        assert_eq!(summaries[0].status, OrgStatus::Aborted);
        assert!((summaries[0].pages_crawled as usize) < 51);
    }
}
