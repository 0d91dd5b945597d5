//! Warm-page fast path and per-page request filtering.
//!
//! A warm page is a fully initialized `about:blank` tab parked with its
//! context after a successful scrape. Borrowing one skips context
//! acquisition and page creation, which dominate scrape latency on a hot
//! service.

use anyhow::{Context as _, Result};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, ErrorReason, ResourceType,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::context_pool::PooledContext;
use crate::utils::constants::COOKIE_CLEAR_PROBABILITY;

/// URL fragments that are aborted for every request: consent-management
/// and tracking-policy machinery that slows loads and pollutes extraction.
const BLOCKED_URL_FRAGMENTS: &[&str] = &[
    "onetrust",
    "cookielaw",
    "cookie-consent",
    "cookie-policy",
    "privacy-policy",
    "gdpr",
];

/// How long a warm-page borrow (pop + reset) may take before the caller
/// falls back to the cold path.
pub const WARM_BORROW_TIMEOUT: Duration = Duration::from_millis(500);

/// A parked page together with the context it lives on. The context stays
/// leased while the page is parked.
#[derive(Debug)]
pub struct WarmPage {
    pub page: Page,
    pub ctx: PooledContext,
    pub parked_at: Instant,
    /// Request-filter task installed at page creation; aborted when the
    /// page is disposed.
    pub filter_task: JoinHandle<()>,
}

/// Pool of pre-warmed pages.
#[derive(Debug)]
pub struct PagePool {
    warm: Mutex<Vec<WarmPage>>,
    capacity: usize,
}

impl PagePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            warm: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub async fn len(&self) -> usize {
        self.warm.lock().await.len()
    }

    /// Pop the most recently parked page, if any.
    pub async fn pop(&self) -> Option<WarmPage> {
        self.warm.lock().await.pop()
    }

    /// Park a page for reuse. Returns the page back if the pool is full so
    /// the caller can dispose it.
    pub async fn push(&self, warm: WarmPage) -> Option<WarmPage> {
        let mut pool = self.warm.lock().await;
        if pool.len() >= self.capacity {
            return Some(warm);
        }
        pool.push(warm);
        None
    }

    /// Remove up to `n` of the oldest parked pages. Memory-pressure path.
    pub async fn shrink(&self, n: usize) -> Vec<WarmPage> {
        let mut pool = self.warm.lock().await;
        let take = n.min(pool.len());
        pool.drain(..take).collect()
    }

    /// Remove every parked page.
    pub async fn drain(&self) -> Vec<WarmPage> {
        self.warm.lock().await.drain(..).collect()
    }
}

/// Reset a warm page for its next borrower: wipe web storage, return the
/// scroll position to the origin, and occasionally clear cookies (the
/// expensive part of the reset, sampled rather than paid on every borrow).
pub async fn reset_warm_page(page: &Page) -> Result<()> {
    page.evaluate(
        "try { localStorage.clear(); sessionStorage.clear(); } catch (e) {} \
         window.scrollTo(0, 0);",
    )
    .await
    .context("Failed to reset page storage")?;

    if rand::random::<f64>() < COOKIE_CLEAR_PROBABILITY {
        page.execute(ClearBrowserCookiesParams::default())
            .await
            .context("Failed to clear cookies")?;
    }

    Ok(())
}

/// Best-effort storage wipe before a page is closed for good.
pub async fn clear_page_storage(page: &Page) {
    if let Err(e) = page
        .evaluate("try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}")
        .await
    {
        trace!("Storage clear before close failed: {e}");
    }
}

/// What the request filter does with an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Allow,
    Abort,
}

/// Decide whether an intercepted request may proceed.
///
/// Consent/tracking URL families are always aborted. Documents, scripts,
/// stylesheets, and data fetches pass; images only when they look like a
/// site logo; everything else (media, fonts, beacons) is dropped.
pub fn filter_decision(url: &str, resource_type: &ResourceType) -> FilterDecision {
    let lower = url.to_ascii_lowercase();
    if BLOCKED_URL_FRAGMENTS.iter().any(|frag| lower.contains(frag)) {
        return FilterDecision::Abort;
    }

    match resource_type {
        ResourceType::Document
        | ResourceType::Script
        | ResourceType::Stylesheet
        | ResourceType::Fetch
        | ResourceType::Xhr => FilterDecision::Allow,
        ResourceType::Image => {
            if lower.contains("logo") {
                FilterDecision::Allow
            } else {
                FilterDecision::Abort
            }
        }
        _ => FilterDecision::Abort,
    }
}

/// Install the resource-routing rules on a freshly created page.
///
/// Interception runs through the CDP Fetch domain: each paused request is
/// continued or aborted according to [`filter_decision`]. Installed exactly
/// once per page, at creation; the returned task ends when the page closes
/// and its event stream terminates.
pub async fn install_request_filter(page: &Page) -> Result<JoinHandle<()>> {
    let mut paused_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("Failed to subscribe to request interception events")?;

    page.execute(EnableParams::default())
        .await
        .context("Failed to enable request interception")?;

    let page = page.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = paused_events.next().await {
            let decision = filter_decision(&event.request.url, &event.resource_type);
            let outcome = match decision {
                FilterDecision::Allow => page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ()),
                FilterDecision::Abort => page
                    .execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::Aborted,
                    ))
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = outcome {
                // The page is usually mid-close when this fails.
                trace!("Request interception response failed: {e}");
                break;
            }
        }
        debug!("Request filter task finished");
    });

    Ok(task)
}

/// Dispose a warm page: abort its filter task, close the page, and drop
/// the page count on its context.
pub async fn dispose_warm_page(warm: WarmPage) -> PooledContext {
    warm.filter_task.abort();
    clear_page_storage(&warm.page).await;
    if let Err(e) = warm.page.close().await {
        warn!("Failed to close warm page: {e}");
    }
    warm.ctx.active_pages.fetch_sub(1, Ordering::Relaxed);
    warm.ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_urls_always_abort() {
        assert_eq!(
            filter_decision(
                "https://cdn.onetrust.com/banner.js",
                &ResourceType::Script
            ),
            FilterDecision::Abort
        );
        assert_eq!(
            filter_decision(
                "https://example.com/cookie-policy",
                &ResourceType::Document
            ),
            FilterDecision::Abort
        );
        assert_eq!(
            filter_decision("https://example.com/GDPR/notice", &ResourceType::Xhr),
            FilterDecision::Abort
        );
    }

    #[test]
    fn core_resource_types_allowed() {
        for rt in [
            ResourceType::Document,
            ResourceType::Script,
            ResourceType::Stylesheet,
            ResourceType::Fetch,
            ResourceType::Xhr,
        ] {
            assert_eq!(
                filter_decision("https://example.com/app.js", &rt),
                FilterDecision::Allow
            );
        }
    }

    #[test]
    fn images_allowed_only_for_logos() {
        assert_eq!(
            filter_decision("https://example.com/assets/logo.png", &ResourceType::Image),
            FilterDecision::Allow
        );
        assert_eq!(
            filter_decision("https://example.com/assets/hero.jpg", &ResourceType::Image),
            FilterDecision::Abort
        );
    }

    #[test]
    fn other_resource_types_abort() {
        for rt in [ResourceType::Media, ResourceType::Font, ResourceType::Ping] {
            assert_eq!(
                filter_decision("https://example.com/file", &rt),
                FilterDecision::Abort
            );
        }
    }
}
