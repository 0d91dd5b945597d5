//! Memory-pressure controller.
//!
//! Samples process RSS on a fixed interval, keeps a small rolling window
//! to spot trends, and drives graduated cleanup on the browser pool: from
//! releasing idle contexts, through aggressive release, up to scheduling a
//! full browser replacement. A slower idle loop reclaims memory when the
//! service is quiet.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser_pool::BrowserPool;
use crate::config::ScrapeConfig;
use crate::request_queue::RequestQueue;

/// Rolling window length for trend detection.
const TREND_WINDOW: usize = 10;

/// Relative change treated as a real trend rather than noise.
const TREND_EPSILON: f64 = 0.05;

/// Pressure bands in MB of RSS.
const BAND_ELEVATED_MB: u64 = 400;
const BAND_HIGH_MB: u64 = 800;
const BAND_CRITICAL_MB: u64 = 1500;

/// Idle-cleanup bar: reclaim when quiet and above this.
const IDLE_CLEANUP_MB: u64 = 500;
const IDLE_INTERVAL: Duration = Duration::from_secs(300);

/// Delay before a pressure-scheduled browser replacement fires, giving
/// in-flight releases a chance to bring RSS down first.
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Read this process's resident set size.
///
/// Linux reads `/proc/self/statm` (field 2, in pages); other platforms
/// report `None` and the controller stays dormant.
#[must_use]
pub fn process_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss) = content.split_whitespace().nth(1) {
                if let Ok(pages) = rss.parse::<u64>() {
                    return Some(pages * 4096);
                }
            }
        }
    }

    None
}

/// Direction of the RSS rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    Stable,
    Increasing,
    Decreasing,
}

/// Point-in-time memory picture for metrics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub rss_mb: u64,
    pub trend: MemoryTrend,
    pub window: Vec<u64>,
}

/// Classify the window: compare newest to oldest with a ±5% dead band.
#[must_use]
pub fn classify_trend(window: &VecDeque<u64>) -> MemoryTrend {
    let (Some(&first), Some(&last)) = (window.front(), window.back()) else {
        return MemoryTrend::Stable;
    };
    if first == 0 {
        return MemoryTrend::Stable;
    }

    let ratio = last as f64 / first as f64;
    if ratio > 1.0 + TREND_EPSILON {
        MemoryTrend::Increasing
    } else if ratio < 1.0 - TREND_EPSILON {
        MemoryTrend::Decreasing
    } else {
        MemoryTrend::Stable
    }
}

/// Drives pool cleanup from observed RSS.
pub struct MemoryController {
    pool: Arc<BrowserPool>,
    queue: Arc<RequestQueue>,
    config: Arc<ScrapeConfig>,
    window: Mutex<VecDeque<u64>>,
    restart_scheduled: AtomicBool,
}

impl MemoryController {
    #[must_use]
    pub fn new(
        pool: Arc<BrowserPool>,
        queue: Arc<RequestQueue>,
        config: Arc<ScrapeConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            queue,
            config,
            window: Mutex::new(VecDeque::with_capacity(TREND_WINDOW)),
            restart_scheduled: AtomicBool::new(false),
        })
    }

    /// Start the pressure loop and the idle loop. The returned handles are
    /// aborted on service shutdown.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let pressure = {
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(controller.config.metrics_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    controller.tick().await;
                }
            })
        };

        let idle = {
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(IDLE_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    controller.idle_tick().await;
                }
            })
        };

        vec![pressure, idle]
    }

    /// One pressure-loop iteration: sample, classify, act.
    pub async fn tick(self: &Arc<Self>) {
        let Some(rss) = process_rss_bytes() else {
            return;
        };
        let rss_mb = rss / (1024 * 1024);

        let trend = {
            let mut window = self.window.lock().expect("memory window poisoned");
            if window.len() == TREND_WINDOW {
                window.pop_front();
            }
            window.push_back(rss_mb);
            classify_trend(&window)
        };

        debug!("Memory tick: {rss_mb} MB ({trend:?})");
        self.act(rss_mb, trend).await;
    }

    async fn act(self: &Arc<Self>, rss_mb: u64, trend: MemoryTrend) {
        if rss_mb < BAND_ELEVATED_MB {
            return;
        }

        if rss_mb <= BAND_HIGH_MB {
            let released = self.pool.release_unused_contexts(false).await;
            let shrunk = self.pool.shrink_warm_pages(1).await;
            debug!(
                "Elevated memory ({rss_mb} MB, {trend:?}): released {released} contexts, {shrunk} warm pages"
            );
            return;
        }

        if rss_mb <= BAND_CRITICAL_MB {
            let released = self.pool.release_unused_contexts(true).await;
            warn!("High memory ({rss_mb} MB, {trend:?}): aggressively released {released} contexts");
            if released == 0 {
                self.schedule_restart(rss_mb);
            }
            return;
        }

        // Critical: free something right now.
        warn!("Critical memory ({rss_mb} MB, {trend:?}): closing a context immediately");
        if !self.pool.close_one_context().await {
            self.schedule_restart(rss_mb);
        }
        self.pool.shrink_warm_pages(2).await;
        self.pool.shrink_warm_pages(2).await;
    }

    /// Schedule a browser replacement shortly, at most one at a time.
    fn schedule_restart(self: &Arc<Self>, rss_mb: u64) {
        if self.restart_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Scheduling browser replacement in {RESTART_DELAY:?} (rss {rss_mb} MB)");

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(RESTART_DELAY).await;
            if let Err(e) = controller.pool.force_cleanup_and_restart().await {
                warn!("Pressure-scheduled browser replacement failed: {e:#}");
            }
            controller.restart_scheduled.store(false, Ordering::Release);
        });
    }

    /// Idle-time cleanup: reclaim when nearly nothing is running but the
    /// process has stayed large.
    pub async fn idle_tick(&self) {
        let Some(rss) = process_rss_bytes() else {
            return;
        };
        let rss_mb = rss / (1024 * 1024);
        let active = self.queue.active();

        if active <= 1 && rss_mb > IDLE_CLEANUP_MB {
            let released = self.pool.release_unused_contexts(true).await;
            let shrunk = self.pool.shrink_warm_pages(2).await;
            info!(
                "Idle cleanup (rss {rss_mb} MB, {active} active): released {released} contexts, {shrunk} warm pages"
            );
        }
    }

    /// Current memory picture.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        let window = self.window.lock().expect("memory window poisoned");
        MemorySnapshot {
            rss_mb: window.back().copied().unwrap_or_else(|| {
                process_rss_bytes().map_or(0, |b| b / (1024 * 1024))
            }),
            trend: classify_trend(&window),
            window: window.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(values: &[u64]) -> VecDeque<u64> {
        values.iter().copied().collect()
    }

    #[test]
    fn trend_classification_uses_five_percent_band() {
        assert_eq!(classify_trend(&window(&[100, 102, 104])), MemoryTrend::Stable);
        assert_eq!(
            classify_trend(&window(&[100, 150, 200])),
            MemoryTrend::Increasing
        );
        assert_eq!(
            classify_trend(&window(&[200, 150, 100])),
            MemoryTrend::Decreasing
        );
        assert_eq!(classify_trend(&window(&[])), MemoryTrend::Stable);
        assert_eq!(classify_trend(&window(&[0, 50])), MemoryTrend::Stable);
    }

    #[test]
    fn rss_reader_reports_on_linux() {
        // On Linux the reader must produce a plausible nonzero value; on
        // other platforms it reports None and the controller idles.
        if cfg!(target_os = "linux") {
            let rss = process_rss_bytes().expect("statm should be readable");
            assert!(rss > 0);
        } else {
            assert!(process_rss_bytes().is_none());
        }
    }
}
