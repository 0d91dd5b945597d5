//! The exposed service surface.
//!
//! `ScraperService` wires the pool, queue, scraper, crawler, and memory
//! controller together and presents the operations the transport layer
//! wraps: `scrape_page`, `scrape_website`, `health`, `metrics`, and
//! `shutdown`. Authorization and rate limiting happen upstream; every URL
//! arriving here is already validated and authorized.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::browser_pool::metrics::{BrowserMetrics, BrowserStatus};
use crate::browser_pool::BrowserPool;
use crate::config::ScrapeConfig;
use crate::crawler::types::{AggregatedResult, CrawlOptions};
use crate::crawler::WebsiteCrawler;
use crate::error::ScrapeError;
use crate::memory::{MemoryController, MemorySnapshot};
use crate::page_scraper::article::{ArticleExtractor, DomArticleExtractor};
use crate::page_scraper::types::ScrapeOutcome;
use crate::page_scraper::PageScraper;
use crate::request_queue::{QueueStats, RequestQueue};

/// Health report for the transport layer's health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub uptime_secs: u64,
    pub memory: MemorySnapshot,
    pub browser: BrowserStatus,
    pub queue: QueueStats,
}

/// Aggregated service metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub memory: MemorySnapshot,
    pub browser: BrowserMetrics,
    pub queue: QueueStats,
}

/// The scraping core, fully assembled.
pub struct ScraperService {
    config: Arc<ScrapeConfig>,
    pool: Arc<BrowserPool>,
    queue: Arc<RequestQueue>,
    scraper: Arc<PageScraper>,
    crawler: WebsiteCrawler,
    memory: Arc<MemoryController>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    request_counter: AtomicU64,
    started_at: Instant,
}

impl ScraperService {
    /// Assemble a service with the default DOM article extractor.
    #[must_use]
    pub fn new(config: ScrapeConfig) -> Arc<Self> {
        Self::with_extractor(config, Arc::new(DomArticleExtractor))
    }

    /// Assemble a service with a custom article extractor.
    #[must_use]
    pub fn with_extractor(config: ScrapeConfig, extractor: Arc<dyn ArticleExtractor>) -> Arc<Self> {
        let config = Arc::new(config);
        let pool = BrowserPool::new(Arc::clone(&config));
        let queue = Arc::new(RequestQueue::new(
            config.max_concurrent_requests,
            config.request_timeout,
            config.queue_timeout,
        ));
        let scraper = Arc::new(PageScraper::new(
            Arc::clone(&pool),
            extractor,
            Arc::clone(&config),
        ));
        let crawler = WebsiteCrawler::new(
            Arc::clone(&queue),
            Arc::clone(&scraper),
            Arc::clone(&pool),
            Arc::clone(&config),
        );
        let memory = MemoryController::new(
            Arc::clone(&pool),
            Arc::clone(&queue),
            Arc::clone(&config),
        );

        Arc::new(Self {
            config,
            pool,
            queue,
            scraper,
            crawler,
            memory,
            background_tasks: Mutex::new(Vec::new()),
            request_counter: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    /// Launch the browser and start the background controllers.
    pub async fn start(self: &Arc<Self>) -> Result<(), ScrapeError> {
        self.pool
            .start()
            .await
            .map_err(|e| ScrapeError::BrowserError(format!("{e:#}")))?;

        let mut tasks = self.background_tasks.lock().await;
        tasks.extend(self.memory.spawn());
        info!("Scraper service started");
        Ok(())
    }

    /// Scrape a single page.
    pub async fn scrape_page(&self, url: &str) -> Result<ScrapeOutcome, ScrapeError> {
        let cancel = CancellationToken::new();
        self.scrape_page_with_cancel(url, &cancel).await
    }

    /// Scrape a single page under a caller-owned cancellation token.
    pub async fn scrape_page_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let id = self.next_request_id("page");
        let scraper = Arc::clone(&self.scraper);
        let target = url.to_string();
        let cancel_token = cancel.clone();
        self.queue
            .enqueue(&id, cancel, move || async move {
                scraper.scrape(&target, &cancel_token).await
            })
            .await
    }

    /// Crawl a site: the root page plus its best subpages.
    pub async fn scrape_website(
        &self,
        url: &str,
        opts: CrawlOptions,
    ) -> Result<AggregatedResult, ScrapeError> {
        let cancel = CancellationToken::new();
        self.scrape_website_with_cancel(url, opts, &cancel).await
    }

    /// Crawl a site under a caller-owned cancellation token. Cancelling
    /// the token cancels the root request and the whole crawl.
    pub async fn scrape_website_with_cancel(
        &self,
        url: &str,
        opts: CrawlOptions,
        cancel: &CancellationToken,
    ) -> Result<AggregatedResult, ScrapeError> {
        self.crawler.crawl(url, opts, cancel).await
    }

    pub async fn health(&self) -> Health {
        Health {
            uptime_secs: self.started_at.elapsed().as_secs(),
            memory: self.memory.snapshot(),
            browser: self.pool.status().await,
            queue: self.queue.stats(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            memory: self.memory.snapshot(),
            browser: self.pool.metrics(),
            queue: self.queue.stats(),
        }
    }

    /// Configuration this service was assembled with.
    #[must_use]
    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Stop the background controllers and shut the pool down. Idempotent.
    pub async fn shutdown(&self) -> Result<(), ScrapeError> {
        for task in self.background_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.pool
            .shutdown()
            .await
            .map_err(|e| ScrapeError::Internal(format!("{e:#}")))?;
        info!("Scraper service shut down");
        Ok(())
    }

    fn next_request_id(&self, kind: &str) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        format!("{kind}-{n}")
    }
}
