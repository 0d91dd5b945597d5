//! Whole-site crawling.
//!
//! Scrapes a root URL, selects the K most promising subpages from its
//! link graph, fans them out under a secondary concurrency cap, and
//! merges everything into one aggregated result. A subpage failure never
//! fails the crawl; cancellation of the root request does.

pub mod selection;
pub mod types;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser_pool::BrowserPool;
use crate::config::ScrapeConfig;
use crate::error::ScrapeError;
use crate::memory::process_rss_bytes;
use crate::page_scraper::types::ScrapeOutcome;
use crate::page_scraper::PageScraper;
use crate::request_queue::RequestQueue;
use crate::utils::url_utils::normalize_url;

use selection::{select_subpages, SubpageOptions, DEFAULT_EXCLUDE_PATTERNS};
use types::{AggregatedResult, CrawlOptions, CrawlStats, SubpageSummary};

/// RSS level at which the crawler sheds idle contexts between batches.
const BATCH_RSS_LIMIT_BYTES: u64 = 1_288_490_188; // 1.2 GiB

/// Crawls a root page plus selected subpages.
pub struct WebsiteCrawler {
    queue: Arc<RequestQueue>,
    scraper: Arc<PageScraper>,
    pool: Arc<BrowserPool>,
    config: Arc<ScrapeConfig>,
}

impl WebsiteCrawler {
    #[must_use]
    pub fn new(
        queue: Arc<RequestQueue>,
        scraper: Arc<PageScraper>,
        pool: Arc<BrowserPool>,
        config: Arc<ScrapeConfig>,
    ) -> Self {
        Self {
            queue,
            scraper,
            pool,
            config,
        }
    }

    /// Crawl `raw_url` and up to K of its subpages.
    pub async fn crawl(
        &self,
        raw_url: &str,
        opts: CrawlOptions,
        cancel: &CancellationToken,
    ) -> Result<AggregatedResult, ScrapeError> {
        let root = normalize_url(raw_url)?;
        let requested = opts
            .subpages_count
            .unwrap_or(self.config.default_subpages_count);

        // Root scrape goes through the queue like any other request; its
        // failure fails the crawl.
        let root_result = {
            let scraper = Arc::clone(&self.scraper);
            let root_url = root.to_string();
            let cancel_token = cancel.clone();
            self.queue
                .enqueue(&format!("crawl-root:{root}"), cancel, move || async move {
                    scraper.scrape(&root_url, &cancel_token).await
                })
                .await?
        };

        let sel_opts = SubpageOptions {
            count: requested,
            keywords: opts.keywords,
            exclude_patterns: opts.exclude_patterns.unwrap_or_else(|| {
                DEFAULT_EXCLUDE_PATTERNS
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            }),
            max_depth: opts.max_depth.unwrap_or(self.config.max_subpage_depth),
        };

        let selected = select_subpages(&root, root_result.links.page_urls.iter(), &sel_opts);
        info!(
            "Crawl of {root}: selected {} of {} candidate subpages",
            selected.len(),
            root_result.links.page_urls.len()
        );

        let outcomes = self
            .fan_out_subpages(&root, selected.clone(), cancel)
            .await?;

        Ok(merge_results(
            root_result,
            requested,
            selected.len(),
            outcomes,
        ))
    }

    /// Scrape the selected subpages in batches under the fan-out cap.
    /// Each subpage carries its own deadline; failures become failed
    /// outcomes rather than errors.
    async fn fan_out_subpages(
        &self,
        root: &url::Url,
        selected: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeOutcome>, ScrapeError> {
        let cap = self.config.max_concurrent_subpage_requests;
        let mut remaining: VecDeque<String> = selected.into();
        let mut outcomes = Vec::new();

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }

            let batch_size = (2 * cap).min(remaining.len());
            let batch: Vec<String> = remaining.drain(..batch_size).collect();
            debug!("Crawl batch of {} subpages (cap {cap})", batch.len());

            let semaphore = Arc::new(Semaphore::new(cap));
            let mut in_flight = FuturesUnordered::new();

            for subpage_url in batch {
                let semaphore = Arc::clone(&semaphore);
                let queue = Arc::clone(&self.queue);
                let scraper = Arc::clone(&self.scraper);
                let cancel_token = cancel.clone();
                let deadline = self.config.subpage_request_timeout;
                in_flight.push(async move {
                    let _permit = semaphore.acquire().await;
                    let id = format!("crawl-sub:{subpage_url}");
                    let task_url = subpage_url.clone();
                    let task_cancel = cancel_token.clone();
                    let result = queue
                        .enqueue_with_deadline(&id, &cancel_token, deadline, move || async move {
                            scraper.scrape(&task_url, &task_cancel).await
                        })
                        .await;
                    (subpage_url, result)
                });
            }

            while let Some((subpage_url, result)) = in_flight.next().await {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(ScrapeError::Cancelled) => {
                        // Crawl-level cancellation; stop the whole fan-out.
                        return Err(ScrapeError::Cancelled);
                    }
                    Err(e) => {
                        warn!("Subpage {subpage_url} of {root} failed: {e}");
                        outcomes.push(ScrapeOutcome::failed(&subpage_url, &e));
                    }
                }
            }

            // Between batches: shed idle contexts when the process has
            // grown past the batch memory bar.
            if let Some(rss) = process_rss_bytes() {
                if rss > BATCH_RSS_LIMIT_BYTES {
                    let released = self.pool.release_unused_contexts(false).await;
                    debug!(
                        "Released {released} contexts between batches (rss {} MB)",
                        rss / (1024 * 1024)
                    );
                }
            }
        }

        Ok(outcomes)
    }
}

/// Merge the root result and subpage outcomes into the aggregated shape.
fn merge_results(
    root_result: ScrapeOutcome,
    requested: usize,
    selected: usize,
    outcomes: Vec<ScrapeOutcome>,
) -> AggregatedResult {
    let mut links = root_result.links.clone();
    let mut combined_markdown = root_result.markdown.clone();
    let mut subpages = Vec::with_capacity(outcomes.len());
    let mut processed = 0;
    let mut failed = 0;
    let mut section = 0;

    for outcome in outcomes {
        if outcome.success {
            processed += 1;
            section += 1;
            links.merge(outcome.links.clone());

            let title = if outcome.metadata.title.is_empty() {
                outcome.url.clone()
            } else {
                outcome.metadata.title.clone()
            };
            let _ = write!(
                combined_markdown,
                "\n\n## Subpage {section}: {title}\n\n{}",
                outcome.markdown.trim()
            );
            subpages.push(SubpageSummary {
                url: outcome.url,
                title,
                success: true,
                error: None,
            });
        } else {
            failed += 1;
            subpages.push(SubpageSummary {
                url: outcome.url,
                title: String::new(),
                success: false,
                error: outcome.error,
            });
        }
    }

    // The social-versus-external rule holds over the merged set too.
    links.remove_social_from_external();

    let stats = CrawlStats {
        requested,
        selected,
        processed,
        failed,
        page_urls: links.page_urls.len(),
        social_urls: links.social_urls.len(),
        contact_urls: links.contact_urls.len(),
        image_urls: links.image_urls.len(),
        external_urls: links.external_urls.len(),
    };

    AggregatedResult {
        main_result: root_result,
        subpages,
        links,
        combined_markdown,
        stats,
    }
}
