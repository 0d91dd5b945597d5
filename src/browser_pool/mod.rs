//! Shared headless-browser pool with context reuse and warm-page fast path.
//!
//! One Chrome process serves the whole service. Isolation comes from CDP
//! browser contexts, pooled and leased exclusively; the expensive launch
//! cost is amortized across requests and bounded by `max_contexts`.
//! `with_page` is the only way in: it borrows a page, runs the caller's
//! logic, and guarantees cleanup on every exit path.

pub mod context_pool;
pub mod launch;
pub mod metrics;
pub mod page_pool;

use anyhow::{Context as _, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ScrapeConfig;
use crate::utils::constants::{CONTEXT_CLOSE_PROBABILITY, WARM_PAGE_BORROW_PROBABILITY};
use crate::utils::timeout::with_op_timeout;

use context_pool::{
    destroy_context, AcquireError, ContextPool, PoolState, PooledContext,
};
use launch::{launch_browser, BrowserHandle};
use metrics::{BrowserMetrics, BrowserStatus, PoolCounters};
use page_pool::{
    clear_page_storage, dispose_warm_page, install_request_filter, reset_warm_page, PagePool,
    WarmPage, WARM_BORROW_TIMEOUT,
};

/// Per-context warm-up creation deadline during pool resets.
const PREWARM_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period before the replaced browser is closed, letting in-flight
/// requests on it finish.
const OLD_BROWSER_GRACE: Duration = Duration::from_secs(10);

/// Shared browser pool. Construct with [`BrowserPool::new`], then call
/// [`BrowserPool::start`] before the first `with_page`.
#[derive(Debug)]
pub struct BrowserPool {
    config: Arc<ScrapeConfig>,
    browser: Mutex<Option<BrowserHandle>>,
    /// Browser generation; bumped on every replacement so leases from a
    /// dead browser cannot re-enter the pool.
    epoch: AtomicU64,
    contexts: ContextPool,
    pages: PagePool,
    counters: PoolCounters,
    shutdown: AtomicBool,
    restart_pending: AtomicBool,
}

/// Exclusive page borrow. Normal release happens inside `with_page`; the
/// `Drop` impl covers unwind paths by spawning the same disposal.
struct PageLease {
    pool: Weak<BrowserPool>,
    page: Option<Page>,
    ctx: Option<PooledContext>,
    filter_task: Option<JoinHandle<()>>,
    from_pool: bool,
}

impl Drop for PageLease {
    fn drop(&mut self) {
        let (Some(page), Some(ctx)) = (self.page.take(), self.ctx.take()) else {
            return;
        };
        let filter_task = self.filter_task.take();
        if let Some(pool) = self.pool.upgrade() {
            tokio::spawn(async move {
                pool.dispose_page(page, ctx, filter_task).await;
            });
        } else if let Some(task) = filter_task {
            task.abort();
        }
    }
}

enum PageAcquisition {
    Acquired(PageLease),
    Draining,
}

impl BrowserPool {
    #[must_use]
    pub fn new(config: Arc<ScrapeConfig>) -> Arc<Self> {
        // Warm pages keep their context leased, so the parking lot stays
        // small relative to the context budget.
        let warm_capacity = (config.min_contexts * 2).max(2);
        Arc::new(Self {
            contexts: ContextPool::new(
                config.min_contexts,
                config.max_contexts,
                config.max_pages_per_context,
            ),
            pages: PagePool::new(warm_capacity),
            config,
            browser: Mutex::new(None),
            epoch: AtomicU64::new(0),
            counters: PoolCounters::default(),
            shutdown: AtomicBool::new(false),
            restart_pending: AtomicBool::new(false),
        })
    }

    /// Launch the browser and warm the minimum context set. Retries up to
    /// 3 times with linear backoff (2s, 4s, 6s).
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut last_err = None;

        for attempt in 1..=3u32 {
            match launch_browser(&self.config).await {
                Ok(handle) => {
                    let disconnect_rx = handle.disconnect_receiver();
                    let browser = handle.browser_arc();
                    *self.browser.lock().await = Some(handle);

                    let epoch = self.epoch.load(Ordering::Acquire);
                    self.spawn_disconnect_watcher(disconnect_rx, epoch);

                    let warmed = self
                        .contexts
                        .prewarm(
                            &browser,
                            epoch,
                            self.config.min_contexts,
                            PREWARM_TIMEOUT,
                            &self.counters,
                        )
                        .await;
                    info!("Browser pool started with {warmed} pre-warmed contexts");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Browser launch attempt {attempt} failed: {e:#}");
                    last_err = Some(e);
                    if attempt < 3 {
                        tokio::time::sleep(Duration::from_secs(2 * u64::from(attempt))).await;
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("no launch attempt made"))
            .context("Failed to start browser pool after 3 attempts"))
    }

    /// Borrow a page, run `f` on it, and release the page on every exit
    /// path. The only entry point for page work.
    pub async fn with_page<F, Fut, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(Page) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.shutdown.load(Ordering::Acquire) {
            anyhow::bail!("browser pool is shut down");
        }

        let mut lease = self.acquire_page().await?;
        let page = lease
            .page
            .clone()
            .ok_or_else(|| anyhow::anyhow!("lease missing page"))?;

        let result = f(page).await;
        self.release_page(&mut lease, result.is_ok()).await;

        if result.is_ok() {
            let total = self.counters.page_processed();
            self.maybe_schedule_restart(total);
        }

        result
    }

    /// Acquire with draining recovery: a draining pool is reset and the
    /// acquire retried up to 3 times with 1s spacing.
    async fn acquire_page(self: &Arc<Self>) -> Result<PageLease> {
        for attempt in 1..=3u32 {
            match self.acquire_page_once().await? {
                PageAcquisition::Acquired(lease) => return Ok(lease),
                PageAcquisition::Draining => {
                    warn!("Context pool draining on acquire (attempt {attempt}), resetting");
                    self.reset_context_pool().await?;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        self.counters.acquire_failure();
        anyhow::bail!("context pool stayed draining through 3 reset attempts")
    }

    async fn acquire_page_once(self: &Arc<Self>) -> Result<PageAcquisition> {
        // Fast path: borrow a warm page most of the time when one is
        // parked. The cold path stays exercised so its failures surface.
        if self.pages.len().await > 0 && rand::random::<f64>() < WARM_PAGE_BORROW_PROBABILITY {
            if let Some(warm) = self.pages.pop().await {
                match tokio::time::timeout(WARM_BORROW_TIMEOUT, reset_warm_page(&warm.page)).await
                {
                    Ok(Ok(())) => {
                        self.counters.page_reused();
                        debug!("Borrowed warm page");
                        return Ok(PageAcquisition::Acquired(PageLease {
                            pool: Arc::downgrade(self),
                            page: Some(warm.page),
                            ctx: Some(warm.ctx),
                            filter_task: Some(warm.filter_task),
                            from_pool: true,
                        }));
                    }
                    Ok(Err(e)) => {
                        debug!("Warm page failed reset, disposing: {e:#}");
                        let ctx = dispose_warm_page(warm).await;
                        self.release_ctx(ctx).await;
                    }
                    Err(_) => {
                        debug!("Warm page reset timed out, disposing");
                        let ctx = dispose_warm_page(warm).await;
                        self.release_ctx(ctx).await;
                    }
                }
            }
        }

        let browser = self.browser_arc().await?;
        let epoch = self.epoch.load(Ordering::Acquire);

        let ctx = match self
            .contexts
            .acquire(&browser, epoch, self.config.acquire_timeout, &self.counters)
            .await
        {
            Ok(ctx) => ctx,
            Err(AcquireError::Draining) => return Ok(PageAcquisition::Draining),
            Err(AcquireError::Closed) => {
                anyhow::bail!("context pool is closed")
            }
            Err(e @ AcquireError::Timeout(_)) => {
                self.counters.acquire_failure();
                return Err(anyhow::Error::new(e).context("context acquire timed out"));
            }
            Err(AcquireError::Browser(e)) => {
                self.counters.acquire_failure();
                return Err(e.context("context creation failed"));
            }
        };

        match self.create_page_on(&browser, &ctx).await {
            Ok((page, filter_task)) => {
                ctx.active_pages.fetch_add(1, Ordering::Relaxed);
                self.counters.page_created();
                Ok(PageAcquisition::Acquired(PageLease {
                    pool: Arc::downgrade(self),
                    page: Some(page),
                    ctx: Some(ctx),
                    filter_task: Some(filter_task),
                    from_pool: false,
                }))
            }
            Err(e) => {
                // A context that cannot produce a page is invalid; replace
                // it rather than recycling the failure.
                self.contexts.forget();
                destroy_context(&browser, ctx, &self.counters).await;
                Err(e)
            }
        }
    }

    /// Create an `about:blank` page on the context and install the
    /// resource-routing rules. The filter is installed here, once per
    /// page, and nowhere else.
    async fn create_page_on(
        &self,
        browser: &Browser,
        ctx: &PooledContext,
    ) -> Result<(Page, JoinHandle<()>)> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(ctx.id.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build page params: {e}"))?;

        let page = with_op_timeout(
            async {
                browser
                    .new_page(params)
                    .await
                    .context("Failed to create page")
            },
            self.config.page_timeout,
            "Page creation",
        )
        .await?;

        match install_request_filter(&page).await {
            Ok(task) => Ok((page, task)),
            Err(e) => {
                if let Err(close_err) = page.close().await {
                    warn!("Failed to close page after filter install failure: {close_err}");
                }
                Err(e)
            }
        }
    }

    /// Release a borrowed page: park it for reuse on success, dispose it
    /// otherwise. Takes the lease's parts so its `Drop` becomes a no-op.
    async fn release_page(self: &Arc<Self>, lease: &mut PageLease, success: bool) {
        let Some(page) = lease.page.take() else { return };
        let Some(ctx) = lease.ctx.take() else { return };
        let filter_task = lease.filter_task.take();
        debug!(
            "Releasing {} page (success: {success})",
            if lease.from_pool { "warm" } else { "fresh" }
        );

        if success {
            if let Err((page, ctx, filter_task)) = self.park_page(page, ctx, filter_task).await {
                self.dispose_page(page, ctx, filter_task).await;
            }
        } else {
            self.dispose_page(page, ctx, filter_task).await;
        }
    }

    /// Try to park a page for the warm pool. Gives the parts back when the
    /// page cannot be parked (no filter, blank/reset failure, pool full is
    /// handled internally by disposing the overflow).
    #[allow(clippy::type_complexity)]
    async fn park_page(
        self: &Arc<Self>,
        page: Page,
        ctx: PooledContext,
        filter_task: Option<JoinHandle<()>>,
    ) -> Result<(), (Page, PooledContext, Option<JoinHandle<()>>)> {
        let Some(filter_task) = filter_task else {
            return Err((page, ctx, None));
        };

        if page.goto("about:blank").await.is_err() {
            return Err((page, ctx, Some(filter_task)));
        }
        if reset_warm_page(&page).await.is_err() {
            return Err((page, ctx, Some(filter_task)));
        }

        let warm = WarmPage {
            page,
            ctx,
            parked_at: Instant::now(),
            filter_task,
        };
        if let Some(overflow) = self.pages.push(warm).await {
            let ctx = dispose_warm_page(overflow).await;
            self.release_ctx(ctx).await;
        }
        Ok(())
    }

    /// Dispose a page: storage wipe, close, page-count decrement, and an
    /// occasional context close when the pool is over its minimum.
    async fn dispose_page(
        self: &Arc<Self>,
        page: Page,
        ctx: PooledContext,
        filter_task: Option<JoinHandle<()>>,
    ) {
        if let Some(task) = filter_task {
            task.abort();
        }
        clear_page_storage(&page).await;
        if let Err(e) = page.close().await {
            warn!("Failed to close page: {e}");
        }

        let remaining = ctx
            .active_pages
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        let over_min = self.contexts.live_count() > self.config.min_contexts;

        if remaining == 0 && over_min && rand::random::<f64>() < CONTEXT_CLOSE_PROBABILITY {
            self.contexts.forget();
            match self.browser_arc().await {
                Ok(browser) => destroy_context(&browser, ctx, &self.counters).await,
                Err(_) => self.counters.context_destroyed(),
            }
        } else {
            self.release_ctx(ctx).await;
        }
    }

    /// Return a context lease to the pool, disposing it when the pool
    /// rejects it (stale epoch or non-running state).
    async fn release_ctx(self: &Arc<Self>, ctx: PooledContext) {
        let epoch = self.epoch.load(Ordering::Acquire);
        if let Some(stale) = self.contexts.release(ctx, epoch).await {
            if stale.epoch == epoch {
                match self.browser_arc().await {
                    Ok(browser) => destroy_context(&browser, stale, &self.counters).await,
                    Err(_) => self.counters.context_destroyed(),
                }
            } else {
                // Died with its browser; nothing to call.
                self.counters.context_destroyed();
            }
        }
    }

    /// Proactively close idle contexts above the pool minimum. Returns how
    /// many were closed. `aggressive` halves the idle bar.
    pub async fn release_unused_contexts(self: &Arc<Self>, aggressive: bool) -> usize {
        let idle_for = if aggressive {
            self.config.soft_idle
        } else {
            self.config.idle_timeout
        };

        let victims = self
            .contexts
            .take_idle(idle_for, self.config.min_contexts)
            .await;
        let count = victims.len();
        if count == 0 {
            return 0;
        }

        match self.browser_arc().await {
            Ok(browser) => {
                for ctx in victims {
                    destroy_context(&browser, ctx, &self.counters).await;
                }
            }
            Err(_) => {
                for _ in 0..count {
                    self.counters.context_destroyed();
                }
            }
        }
        info!("Released {count} idle contexts");
        count
    }

    /// Close one available context immediately, ignoring idle time and the
    /// pool minimum. Memory-critical path.
    pub async fn close_one_context(self: &Arc<Self>) -> bool {
        let Some(ctx) = self.contexts.take_one().await else {
            return false;
        };
        match self.browser_arc().await {
            Ok(browser) => destroy_context(&browser, ctx, &self.counters).await,
            Err(_) => self.counters.context_destroyed(),
        }
        true
    }

    /// Dispose up to `n` warm pages, releasing their contexts.
    pub async fn shrink_warm_pages(self: &Arc<Self>, n: usize) -> usize {
        let victims = self.pages.shrink(n).await;
        let count = victims.len();
        for warm in victims {
            let ctx = dispose_warm_page(warm).await;
            self.release_ctx(ctx).await;
        }
        count
    }

    /// Drain and rebuild the context pool on the current browser.
    pub async fn reset_context_pool(self: &Arc<Self>) -> Result<()> {
        info!("Resetting context pool");
        self.contexts.set_state(PoolState::Draining);

        let stale = self.contexts.drain().await;
        if !stale.is_empty() {
            if let Ok(browser) = self.browser_arc().await {
                let counters_len = stale.len();
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    for ctx in stale {
                        destroy_context(&browser, ctx, &pool.counters).await;
                    }
                    debug!("Disposed {counters_len} contexts from drained pool");
                });
            }
        }

        self.contexts.set_state(PoolState::Running);

        let browser = self.browser_arc().await?;
        let epoch = self.epoch.load(Ordering::Acquire);
        self.contexts
            .prewarm(
                &browser,
                epoch,
                self.config.min_contexts,
                PREWARM_TIMEOUT,
                &self.counters,
            )
            .await;
        Ok(())
    }

    /// Replace the browser process: the replacement is initialized first,
    /// the old browser closes after a grace period so in-flight requests
    /// on it can finish.
    pub async fn force_cleanup_and_restart(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Ok(());
        }

        info!("Replacing browser (forced cleanup and restart)");
        self.counters.restart();

        let new_handle = launch_browser(&self.config)
            .await
            .context("Failed to launch replacement browser")?;
        let disconnect_rx = new_handle.disconnect_receiver();
        let new_browser = new_handle.browser_arc();

        let new_epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        // Warm pages and pooled contexts belong to the old browser; they
        // die with it, so only the accounting is updated here.
        for warm in self.pages.drain().await {
            warm.filter_task.abort();
            self.contexts.forget();
            self.counters.context_destroyed();
        }

        self.contexts.set_state(PoolState::Draining);
        let stale = self.contexts.drain().await;
        for _ in &stale {
            self.counters.context_destroyed();
        }
        drop(stale);
        self.contexts.set_state(PoolState::Running);

        let old_handle = self.browser.lock().await.replace(new_handle);
        self.spawn_disconnect_watcher(disconnect_rx, new_epoch);

        self.contexts
            .prewarm(
                &new_browser,
                new_epoch,
                self.config.min_contexts,
                PREWARM_TIMEOUT,
                &self.counters,
            )
            .await;

        if let Some(old) = old_handle {
            tokio::spawn(async move {
                tokio::time::sleep(OLD_BROWSER_GRACE).await;
                info!("Closing replaced browser after grace period");
                old.close().await;
            });
        }

        Ok(())
    }

    /// Drain both pools and close the browser. Idempotent; `with_page`
    /// calls after this fail.
    pub async fn shutdown(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down browser pool");
        self.contexts.set_state(PoolState::Closed);

        let warm = self.pages.drain().await;
        let stale = self.contexts.drain().await;

        if let Some(handle) = self.browser.lock().await.take() {
            for w in warm {
                w.filter_task.abort();
                if let Err(e) = w.page.close().await {
                    debug!("Failed to close warm page during shutdown: {e}");
                }
                self.contexts.forget();
                self.counters.context_destroyed();
            }
            for ctx in stale {
                destroy_context(handle.browser(), ctx, &self.counters).await;
            }
            handle.close().await;
        }

        info!("Browser pool shutdown complete");
        Ok(())
    }

    pub async fn status(&self) -> BrowserStatus {
        BrowserStatus {
            state: self.contexts.state().to_string(),
            connected: self.browser.lock().await.is_some(),
            contexts_live: self.contexts.live_count(),
            contexts_available: self.contexts.available_count().await,
            warm_pages: self.pages.len().await,
            pages_processed: self.counters.pages_processed(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> BrowserMetrics {
        self.counters.snapshot()
    }

    async fn browser_arc(&self) -> Result<Arc<Browser>> {
        self.browser
            .lock()
            .await
            .as_ref()
            .map(BrowserHandle::browser_arc)
            .ok_or_else(|| anyhow::anyhow!("browser not started"))
    }

    /// Schedule a background restart when the page count crosses the
    /// threshold. At most one restart is pending at a time.
    fn maybe_schedule_restart(self: &Arc<Self>, total_pages: u64) {
        if self.config.restart_threshold == 0 || total_pages % self.config.restart_threshold != 0 {
            return;
        }
        if self.restart_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Restart threshold reached at {total_pages} pages, scheduling browser replacement");
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pool.force_cleanup_and_restart().await {
                error!("Scheduled browser restart failed: {e:#}");
            }
            pool.restart_pending.store(false, Ordering::Release);
        });
    }

    /// Watch for the browser's CDP connection dying outside a deliberate
    /// replacement and re-initialize after a short delay.
    fn spawn_disconnect_watcher(self: &Arc<Self>, mut rx: watch::Receiver<bool>, epoch: u64) {
        let pool = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                if *rx.borrow() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }

            let Some(pool) = pool.upgrade() else { return };
            if pool.shutdown.load(Ordering::Acquire)
                || pool.epoch.load(Ordering::Acquire) != epoch
                || pool.restart_pending.load(Ordering::Acquire)
            {
                // Deliberate close or an already-superseded browser.
                return;
            }

            warn!("Browser disconnected unexpectedly, re-initializing in 1s");
            tokio::time::sleep(Duration::from_secs(1)).await;
            if let Err(e) = pool.force_cleanup_and_restart().await {
                error!("Browser re-initialization after disconnect failed: {e:#}");
            }
        });
    }
}
