//! Reusable browser-context pool.
//!
//! A context is the isolation unit (own cookies, storage, cache) and the
//! unit of exclusive lease: a context handed out by `acquire` belongs to
//! exactly one caller until released. Borrowing is LIFO-biased so recently
//! used contexts, whose renderer caches are still warm, go out first.

use anyhow::{Context as _, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, DisposeBrowserContextParams,
};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::metrics::PoolCounters;

/// Lifecycle of the context pool, exposed so callers can distinguish a
/// transient draining condition from a terminal close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    Draining,
    Closed,
}

impl PoolState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Closed => 2,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why an acquire did not produce a context.
#[derive(Debug)]
pub enum AcquireError {
    /// Pool is draining; the caller should reset and retry.
    Draining,
    /// Pool is closed for good.
    Closed,
    /// Capacity stayed exhausted for the whole acquire window.
    Timeout(Duration),
    /// Context creation failed at the browser.
    Browser(anyhow::Error),
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draining => write!(f, "context pool is draining"),
            Self::Closed => write!(f, "context pool is closed"),
            Self::Timeout(d) => write!(f, "context acquire timed out after {d:?}"),
            Self::Browser(e) => write!(f, "context creation failed: {e:#}"),
        }
    }
}

impl std::error::Error for AcquireError {}

/// A browser context owned by the pool.
#[derive(Debug)]
pub struct PooledContext {
    pub id: BrowserContextId,
    /// Browser generation this context was created on. Contexts from a
    /// previous generation die with their browser and must not re-enter
    /// the pool.
    pub epoch: u64,
    /// Pages currently alive on this context. Advisory: consulted only by
    /// cleanup heuristics.
    pub active_pages: Arc<AtomicUsize>,
    pub created_at: Instant,
    pub last_used: Instant,
}

/// LIFO pool of reusable contexts with explicit lifecycle state.
#[derive(Debug)]
pub struct ContextPool {
    available: Mutex<Vec<PooledContext>>,
    /// Leased + available.
    live: AtomicUsize,
    state: AtomicU8,
    max_contexts: usize,
    min_contexts: usize,
    max_pages_per_context: usize,
}

impl ContextPool {
    pub fn new(min_contexts: usize, max_contexts: usize, max_pages_per_context: usize) -> Self {
        Self {
            available: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            state: AtomicU8::new(PoolState::Running.as_u8()),
            max_contexts,
            min_contexts,
            max_pages_per_context: max_pages_per_context.max(1),
        }
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_draining(&self) -> bool {
        self.state() == PoolState::Draining
    }

    pub fn set_state(&self, state: PoolState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub async fn available_count(&self) -> usize {
        self.available.lock().await.len()
    }

    /// Acquire an exclusive context lease, creating one if the pool is
    /// under capacity. Waits up to `timeout` for capacity to free up.
    pub async fn acquire(
        &self,
        browser: &Browser,
        epoch: u64,
        timeout: Duration,
        counters: &PoolCounters,
    ) -> Result<PooledContext, AcquireError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.state() {
                PoolState::Running => {}
                PoolState::Draining => return Err(AcquireError::Draining),
                PoolState::Closed => return Err(AcquireError::Closed),
            }

            // LIFO: most recently returned context first.
            let candidate = self.available.lock().await.pop();
            if let Some(mut ctx) = candidate {
                if ctx.epoch != epoch {
                    // Stale generation: its browser is gone or going;
                    // forget it and let the slot be reused.
                    debug!("Discarding stale context {:?} (epoch {})", ctx.id, ctx.epoch);
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    continue;
                }
                // Validate on borrow: a context already at its page budget
                // is worn out; replace it instead of handing it out.
                if ctx.active_pages.load(Ordering::Relaxed) >= self.max_pages_per_context {
                    debug!("Retiring context {:?} at page budget", ctx.id);
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    destroy_context(browser, ctx, counters).await;
                    continue;
                }
                ctx.last_used = Instant::now();
                debug!("Borrowed context {:?} from pool", ctx.id);
                return Ok(ctx);
            }

            if self.live.load(Ordering::Relaxed) < self.max_contexts {
                // Reserve the slot before the slow CDP call so concurrent
                // acquires do not overshoot the cap.
                self.live.fetch_add(1, Ordering::Relaxed);
                match create_context(browser, epoch, counters).await {
                    Ok(ctx) => return Ok(ctx),
                    Err(e) => {
                        self.live.fetch_sub(1, Ordering::Relaxed);
                        return Err(AcquireError::Browser(e));
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(AcquireError::Timeout(timeout));
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Return a leased context. `Some(ctx)` back means the caller must
    /// dispose it (stale generation or pool no longer accepting).
    pub async fn release(&self, mut ctx: PooledContext, epoch: u64) -> Option<PooledContext> {
        if ctx.epoch != epoch || self.state() != PoolState::Running {
            self.live.fetch_sub(1, Ordering::Relaxed);
            return Some(ctx);
        }

        ctx.last_used = Instant::now();
        self.available.lock().await.push(ctx);
        None
    }

    /// Remove the given leased context from the pool's accounting without
    /// returning it. Used when the caller destroys the context itself.
    pub fn forget(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// Take idle contexts above `keep_min`, oldest first.
    pub async fn take_idle(&self, idle_for: Duration, keep_min: usize) -> Vec<PooledContext> {
        let mut available = self.available.lock().await;
        let now = Instant::now();
        let mut victims = Vec::new();

        // Oldest entries sit at the front of the LIFO vec.
        while self.live.load(Ordering::Relaxed).saturating_sub(victims.len()) > keep_min {
            match available.first() {
                Some(ctx) if now.duration_since(ctx.last_used) >= idle_for => {
                    victims.push(available.remove(0));
                }
                _ => break,
            }
        }

        for _ in &victims {
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
        victims
    }

    /// Take a single available context regardless of idle time or the pool
    /// minimum. Memory-critical path only.
    pub async fn take_one(&self) -> Option<PooledContext> {
        let taken = self.available.lock().await.pop();
        if taken.is_some() {
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
        taken
    }

    /// Warm the pool up to `target` live contexts, one at a time, each
    /// creation bounded by `per_timeout`. Stops early on failure; a partial
    /// warm-up is not an error, acquire fills the gap on demand.
    pub async fn prewarm(
        &self,
        browser: &Browser,
        epoch: u64,
        target: usize,
        per_timeout: Duration,
        counters: &PoolCounters,
    ) -> usize {
        let mut warmed = 0;
        while self.live_count() < target.min(self.max_contexts) {
            if self.state() != PoolState::Running {
                break;
            }
            self.live.fetch_add(1, Ordering::Relaxed);
            match tokio::time::timeout(per_timeout, create_context(browser, epoch, counters)).await
            {
                Ok(Ok(ctx)) => {
                    self.available.lock().await.push(ctx);
                    warmed += 1;
                }
                Ok(Err(e)) => {
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    warn!("Context pre-warm failed: {e:#}");
                    break;
                }
                Err(_) => {
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    warn!("Context pre-warm timed out after {per_timeout:?}");
                    break;
                }
            }
        }
        warmed
    }

    /// Drain every available context, decrementing the live count for each.
    pub async fn drain(&self) -> Vec<PooledContext> {
        let mut available = self.available.lock().await;
        let drained: Vec<PooledContext> = available.drain(..).collect();
        self.live.fetch_sub(drained.len(), Ordering::Relaxed);
        drained
    }
}

/// Create a fresh isolated context on the browser.
pub async fn create_context(
    browser: &Browser,
    epoch: u64,
    counters: &PoolCounters,
) -> Result<PooledContext> {
    let resp = browser
        .execute(CreateBrowserContextParams::default())
        .await
        .context("Failed to create browser context")?;

    let id = resp.result.browser_context_id.clone();
    counters.context_created();
    debug!("Created browser context {id:?} (epoch {epoch})");

    let now = Instant::now();
    Ok(PooledContext {
        id,
        epoch,
        active_pages: Arc::new(AtomicUsize::new(0)),
        created_at: now,
        last_used: now,
    })
}

/// Dispose a context on the browser. Errors are swallowed: the context is
/// gone from the pool either way, and a failed dispose usually means the
/// browser already dropped it.
pub async fn destroy_context(browser: &Browser, ctx: PooledContext, counters: &PoolCounters) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(ctx.id.clone()))
        .await
    {
        warn!("Failed to dispose context {:?}: {e}", ctx.id);
    }
    counters.context_destroyed();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_state_round_trips() {
        for state in [PoolState::Running, PoolState::Draining, PoolState::Closed] {
            assert_eq!(PoolState::from_u8(state.as_u8()), state);
        }
    }

    #[tokio::test]
    async fn release_rejects_stale_epoch() {
        let pool = ContextPool::new(1, 4, 10);
        pool.live.fetch_add(1, Ordering::Relaxed);

        let ctx = PooledContext {
            id: BrowserContextId::from("ctx-1".to_string()),
            epoch: 0,
            active_pages: Arc::new(AtomicUsize::new(0)),
            created_at: Instant::now(),
            last_used: Instant::now(),
        };

        // Current epoch has moved on; the context must come back for
        // disposal and the live count must drop.
        let rejected = pool.release(ctx, 1).await;
        assert!(rejected.is_some());
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn take_idle_respects_minimum() {
        let pool = ContextPool::new(1, 4, 10);
        for i in 0..3 {
            pool.live.fetch_add(1, Ordering::Relaxed);
            let ctx = PooledContext {
                id: BrowserContextId::from(format!("ctx-{i}")),
                epoch: 0,
                active_pages: Arc::new(AtomicUsize::new(0)),
                created_at: Instant::now(),
                last_used: Instant::now() - Duration::from_secs(300),
            };
            pool.available.lock().await.push(ctx);
        }

        let victims = pool.take_idle(Duration::from_secs(60), 1).await;
        assert_eq!(victims.len(), 2);
        assert_eq!(pool.live_count(), 1);
    }

    #[tokio::test]
    async fn drain_empties_pool() {
        let pool = ContextPool::new(1, 4, 10);
        for i in 0..2 {
            pool.live.fetch_add(1, Ordering::Relaxed);
            let ctx = PooledContext {
                id: BrowserContextId::from(format!("ctx-{i}")),
                epoch: 0,
                active_pages: Arc::new(AtomicUsize::new(0)),
                created_at: Instant::now(),
                last_used: Instant::now(),
            };
            pool.available.lock().await.push(ctx);
        }

        let drained = pool.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.available_count().await, 0);
    }
}
