//! Single-page scraping.
//!
//! Turns one URL into a [`ScrapeOutcome`]: navigate through a pooled page,
//! settle, optionally scroll for lazy content, extract everything in one
//! in-page round-trip, classify links, pull the readable article, and
//! assemble markdown. Transient failures retry with exponential backoff.

pub mod article;
pub mod js_scripts;
pub mod links;
pub mod markdown;
pub mod types;

use anyhow::{Context as _, Result};
use chromiumoxide::page::Page;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::browser_pool::BrowserPool;
use crate::config::ScrapeConfig;
use crate::error::{ErrorInfo, ScrapeError};
use crate::utils::timeout::with_op_timeout;
use crate::utils::url_utils::normalize_url;
use url::Url;

use article::ArticleExtractor;
use js_scripts::{
    page_extract_script, scroll_by_script, DYNAMIC_CONTENT_SCRIPT, NAV_TIMING_SETTLED_SCRIPT,
    SCROLL_STATE_SCRIPT, SCROLL_TOP_SCRIPT, SCROLL_VIEWPORT_SCRIPT,
};
use links::build_link_bundle;
use markdown::build_markdown;
use types::{RawPageExtract, ScrapeOutcome};

/// Ceiling on retry backoff.
const MAX_BACKOFF: Duration = Duration::from_millis(5000);

/// How long to wait for Navigation Timing to report the load finished.
const TIMING_SETTLE_WINDOW: Duration = Duration::from_secs(5);
const TIMING_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct ScrollState {
    height: f64,
    y: f64,
    viewport: f64,
}

/// The unit of work submitted to the request queue.
pub struct PageScraper {
    pool: Arc<BrowserPool>,
    extractor: Arc<dyn ArticleExtractor>,
    config: Arc<ScrapeConfig>,
}

impl PageScraper {
    #[must_use]
    pub fn new(
        pool: Arc<BrowserPool>,
        extractor: Arc<dyn ArticleExtractor>,
        config: Arc<ScrapeConfig>,
    ) -> Self {
        Self {
            pool,
            extractor,
            config,
        }
    }

    /// Scrape one URL, retrying transient failures with exponential
    /// backoff (`min(1000 * 2^(attempt-1), 5000)` ms between attempts).
    pub async fn scrape(
        &self,
        raw_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let url = normalize_url(raw_url)?;
        let attempts = self.config.max_retries + 1;
        let mut last_err = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }

            if attempt > 1 {
                let backoff_ms = 1000u64
                    .saturating_mul(2u64.saturating_pow(attempt - 2))
                    .min(MAX_BACKOFF.as_millis() as u64);
                debug!("Retrying {url} in {backoff_ms}ms (attempt {attempt}/{attempts})");
                tokio::select! {
                    () = cancel.cancelled() => return Err(ScrapeError::Cancelled),
                    () = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                }
            }

            match self.scrape_attempt(&url).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retryable() || attempt == attempts {
                        warn!("Scrape of {url} failed: {e}");
                        return Err(e);
                    }
                    warn!("Scrape attempt {attempt} for {url} failed, will retry: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ScrapeError::Internal("retry loop exhausted".to_string())))
    }

    async fn scrape_attempt(&self, url: &Url) -> Result<ScrapeOutcome, ScrapeError> {
        let config = Arc::clone(&self.config);
        let target = url.clone();

        let (html, extract) = self
            .pool
            .with_page(|page| async move {
                navigate_and_settle(&page, &target, &config).await?;
                scroll_for_dynamic_content(&page, &config).await?;

                let html = page
                    .content()
                    .await
                    .context("Failed to read page content")?;
                let extract = run_page_extraction(&page, &config).await?;
                Ok((html, extract))
            })
            .await
            .map_err(ScrapeError::from)?;

        let bundle = build_link_bundle(url, &extract, &self.config);

        let article = self
            .extractor
            .extract(&html, url)
            .map_err(|e| ScrapeError::Extraction(format!("{e:#}")))?;

        let mut metadata: types::PageMetadata = extract.metadata.clone().into();
        if metadata.title.is_empty() {
            metadata.title.clone_from(&article.title);
        }
        if metadata.site_name.is_none() {
            metadata.site_name.clone_from(&article.site_name);
        }
        if metadata.lang.is_none() {
            metadata.lang.clone_from(&article.lang);
        }

        let markdown = build_markdown(
            &metadata.title,
            &article.html_content,
            &extract.nav_links,
            &bundle,
            &extract.footer_text,
            &self.config,
        );

        Ok(ScrapeOutcome {
            url: url.to_string(),
            metadata,
            main_content: article.text_content,
            markdown,
            links: bundle,
            footer: extract.footer_text,
            success: true,
            error: None,
        })
    }
}

impl ScrapeOutcome {
    /// A failed scrape entry, used by the crawler for isolated subpage
    /// failures.
    #[must_use]
    pub fn failed(url: &str, err: &ScrapeError) -> Self {
        Self {
            url: url.to_string(),
            metadata: types::PageMetadata::default(),
            main_content: String::new(),
            markdown: String::new(),
            links: types::LinkBundle::default(),
            footer: String::new(),
            success: false,
            error: Some(ErrorInfo::from_error(err)),
        }
    }
}

/// Navigate to the target and wait until the page is usable: navigation
/// response, load event, Navigation Timing settle, then a short stability
/// delay for late layout work.
async fn navigate_and_settle(page: &Page, url: &Url, config: &ScrapeConfig) -> Result<()> {
    with_op_timeout(
        async {
            page.goto(url.as_str())
                .await
                .context("Navigation failed")?;
            Ok(())
        },
        config.navigation_timeout,
        "Page navigation",
    )
    .await?;

    with_op_timeout(
        async {
            page.wait_for_navigation()
                .await
                .context("Page load did not complete")?;
            Ok(())
        },
        config.navigation_timeout,
        "Page load",
    )
    .await?;

    let deadline = Instant::now() + TIMING_SETTLE_WINDOW;
    loop {
        let settled = page
            .evaluate(NAV_TIMING_SETTLED_SCRIPT)
            .await
            .ok()
            .and_then(|r| r.into_value::<bool>().ok())
            .unwrap_or(true);
        if settled || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(TIMING_POLL_INTERVAL).await;
    }

    tokio::time::sleep(config.stability_delay).await;
    Ok(())
}

/// Scroll pages that show lazy-load signals so deferred content renders.
///
/// Scrolls in fixed steps until the bottom is near, the time budget is
/// spent, or the page height stops growing. Pages without dynamic-content
/// signals are not scrolled at all.
async fn scroll_for_dynamic_content(page: &Page, config: &ScrapeConfig) -> Result<()> {
    let dynamic = page
        .evaluate(DYNAMIC_CONTENT_SCRIPT)
        .await
        .ok()
        .and_then(|r| r.into_value::<bool>().ok())
        .unwrap_or(false);
    if !dynamic {
        return Ok(());
    }

    debug!("Dynamic content detected, scrolling");
    let started = Instant::now();
    let step_script = scroll_by_script(config.scroll_by_pixels);
    let mut last_height = 0f64;
    let mut unchanged = 0u32;
    let mut steps = 0u64;

    loop {
        let state: ScrollState = match page
            .evaluate(SCROLL_STATE_SCRIPT)
            .await
            .ok()
            .and_then(|r| r.into_value().ok())
        {
            Some(state) => state,
            None => break,
        };

        let near_bottom = state.y + state.viewport + 50.0 >= state.height;
        if (steps > 0 && near_bottom)
            || started.elapsed() >= config.max_scroll_time
            || unchanged >= 3
        {
            // One viewport minimum even when the first reading already
            // looked final; lazy loaders often only arm on first scroll.
            if f64::from(config.scroll_by_pixels) * (steps as f64) < state.viewport {
                let _ = page.evaluate(SCROLL_VIEWPORT_SCRIPT).await;
            }
            break;
        }

        if page.evaluate(step_script.as_str()).await.is_err() {
            break;
        }
        steps += 1;

        if (state.height - last_height).abs() < f64::EPSILON {
            unchanged += 1;
        } else {
            unchanged = 0;
            last_height = state.height;
        }

        tokio::time::sleep(config.scroll_interval).await;
    }

    let _ = page.evaluate(SCROLL_TOP_SCRIPT).await;
    Ok(())
}

/// The single in-page extraction round-trip.
async fn run_page_extraction(page: &Page, config: &ScrapeConfig) -> Result<RawPageExtract> {
    let script = page_extract_script(config.email_scan_window_chars, config.footer_max_chars);
    let result = page
        .evaluate(script.as_str())
        .await
        .context("Failed to execute page extraction script")?;

    result
        .into_value::<RawPageExtract>()
        .context("Failed to parse page extraction payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_documented_curve() {
        // min(1000 * 2^(attempt-1), 5000) for retry attempts 1, 2, 3, 4.
        let backoff = |retry: u32| {
            1000u64
                .saturating_mul(2u64.saturating_pow(retry - 1))
                .min(MAX_BACKOFF.as_millis() as u64)
        };
        assert_eq!(backoff(1), 1000);
        assert_eq!(backoff(2), 2000);
        assert_eq!(backoff(3), 4000);
        assert_eq!(backoff(4), 5000);
    }

    #[test]
    fn failed_outcome_carries_error_info() {
        let outcome =
            ScrapeOutcome::failed("https://example.com", &ScrapeError::Navigation("dns".into()));
        assert!(!outcome.success);
        assert_eq!(outcome.url, "https://example.com");
        assert_eq!(outcome.error.as_ref().unwrap().kind, "navigation");
        assert!(outcome.links.is_empty());
    }
}
