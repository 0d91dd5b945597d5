//! Pool observability: counters and snapshots.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated throughout the pool. All advisory; nothing
/// gates correctness on them.
#[derive(Debug, Default)]
pub struct PoolCounters {
    contexts_created: AtomicU64,
    contexts_destroyed: AtomicU64,
    pages_created: AtomicU64,
    pages_reused: AtomicU64,
    pages_processed: AtomicU64,
    restarts: AtomicU64,
    acquire_failures: AtomicU64,
}

impl PoolCounters {
    pub fn context_created(&self) {
        self.contexts_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn context_destroyed(&self) {
        self.contexts_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn page_created(&self) {
        self.pages_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn page_reused(&self) {
        self.pages_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new total so the caller can check the restart threshold.
    pub fn page_processed(&self) -> u64 {
        self.pages_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn pages_processed(&self) -> u64 {
        self.pages_processed.load(Ordering::Relaxed)
    }

    pub fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acquire_failure(&self) {
        self.acquire_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BrowserMetrics {
        BrowserMetrics {
            contexts_created: self.contexts_created.load(Ordering::Relaxed),
            contexts_destroyed: self.contexts_destroyed.load(Ordering::Relaxed),
            pages_created: self.pages_created.load(Ordering::Relaxed),
            pages_reused: self.pages_reused.load(Ordering::Relaxed),
            pages_processed: self.pages_processed.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool state for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserStatus {
    /// Pool lifecycle state (`running` / `draining` / `closed`).
    pub state: String,
    /// Whether a browser process is currently attached.
    pub connected: bool,
    pub contexts_live: usize,
    pub contexts_available: usize,
    pub warm_pages: usize,
    pub pages_processed: u64,
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserMetrics {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub pages_created: u64,
    pub pages_reused: u64,
    pub pages_processed: u64,
    pub restarts: u64,
    pub acquire_failures: u64,
}
