//! Service configuration.
//!
//! Every knob has a default matching production behavior; deployments
//! override through environment variables or the `with_*` builder methods.
//! Durations are stored as `Duration` internally and configured in
//! milliseconds (`*_MS` keys) or plain counts.

use std::path::PathBuf;
use std::time::Duration;

use crate::utils::constants::{
    DEFAULT_MAX_CONTEXTS, DEFAULT_MAX_PAGES_PER_CONTEXT, DEFAULT_MIN_CONTEXTS,
    DEFAULT_RESTART_THRESHOLD,
};

/// Main configuration for the scraping core.
///
/// Shared as `Arc<ScrapeConfig>` across the pool, queue, scraper, crawler,
/// and memory controller; nothing mutates it after startup.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    // Queue
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub queue_timeout: Duration,

    // Scraper
    pub max_retries: u32,
    pub page_timeout: Duration,
    pub navigation_timeout: Duration,
    pub stability_delay: Duration,
    pub scroll_by_pixels: u32,
    pub scroll_interval: Duration,
    pub max_scroll_time: Duration,

    // Crawler
    pub max_concurrent_subpage_requests: usize,
    pub subpage_request_timeout: Duration,
    pub default_subpages_count: usize,
    pub max_subpage_depth: usize,

    // Browser pool
    pub max_contexts: usize,
    pub min_contexts: usize,
    pub max_pages_per_context: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub soft_idle: Duration,
    pub metrics_interval: Duration,
    pub restart_threshold: u64,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,

    // Content-size floors. These bound work per page, not correctness.
    pub email_scan_window_chars: usize,
    pub footer_max_chars: usize,
    pub nav_links_cap: usize,
    pub page_links_cap: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 50,
            request_timeout: Duration::from_secs(60),
            queue_timeout: Duration::from_secs(120),

            max_retries: 1,
            page_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
            stability_delay: Duration::from_millis(500),
            scroll_by_pixels: 250,
            scroll_interval: Duration::from_millis(100),
            max_scroll_time: Duration::from_secs(10),

            max_concurrent_subpage_requests: 10,
            subpage_request_timeout: Duration::from_secs(15),
            default_subpages_count: 5,
            max_subpage_depth: 2,

            max_contexts: DEFAULT_MAX_CONTEXTS,
            min_contexts: DEFAULT_MIN_CONTEXTS,
            max_pages_per_context: DEFAULT_MAX_PAGES_PER_CONTEXT,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            soft_idle: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(10),
            restart_threshold: DEFAULT_RESTART_THRESHOLD,
            headless: true,
            chrome_executable: None,

            email_scan_window_chars: 15_000,
            footer_max_chars: 1_000,
            nav_links_cap: 30,
            page_links_cap: 50,
        }
    }
}

impl ScrapeConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable. Unparseable values are
    /// logged and ignored rather than failing startup.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse("MAX_CONCURRENT_REQUESTS") {
            cfg.max_concurrent_requests = v;
        }
        if let Some(v) = env_parse::<u64>("REQUEST_TIMEOUT_MS") {
            cfg.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("QUEUE_TIMEOUT_MS") {
            cfg.queue_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("MAX_RETRIES") {
            cfg.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("PAGE_TIMEOUT_MS") {
            cfg.page_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("NAVIGATION_TIMEOUT_MS") {
            cfg.navigation_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_SUBPAGE_REQUESTS") {
            cfg.max_concurrent_subpage_requests = v;
        }
        if let Some(v) = env_parse::<u64>("SUBPAGE_REQUEST_TIMEOUT_MS") {
            cfg.subpage_request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("DEFAULT_SUBPAGES_COUNT") {
            cfg.default_subpages_count = v;
        }
        if let Some(v) = env_parse("MAX_CONTEXTS") {
            cfg.max_contexts = v;
        }
        if let Some(v) = env_parse("MIN_CONTEXTS") {
            cfg.min_contexts = v;
        }
        if let Ok(path) = std::env::var("CHROMIUM_PATH") {
            cfg.chrome_executable = Some(PathBuf::from(path));
        }

        cfg.clamp();
        cfg
    }

    /// Keep pool bounds internally consistent regardless of what the
    /// environment supplied.
    fn clamp(&mut self) {
        if self.max_contexts == 0 {
            self.max_contexts = 1;
        }
        if self.min_contexts > self.max_contexts {
            self.min_contexts = self.max_contexts;
        }
        if self.max_concurrent_requests == 0 {
            self.max_concurrent_requests = 1;
        }
        if self.max_concurrent_subpage_requests == 0 {
            self.max_concurrent_subpage_requests = 1;
        }
    }

    #[must_use]
    pub fn with_max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = n.max(1);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    #[must_use]
    pub fn with_queue_timeout(mut self, d: Duration) -> Self {
        self.queue_timeout = d;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    #[must_use]
    pub fn with_context_bounds(mut self, min: usize, max: usize) -> Self {
        self.max_contexts = max.max(1);
        self.min_contexts = min.min(self.max_contexts);
        self
    }

    #[must_use]
    pub fn with_restart_threshold(mut self, pages: u64) -> Self {
        self.restart_threshold = pages.max(1);
        self
    }

    #[must_use]
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn with_chrome_executable(mut self, path: PathBuf) -> Self {
        self.chrome_executable = Some(path);
        self
    }

    #[must_use]
    pub fn with_subpage_fanout(mut self, cap: usize, timeout: Duration) -> Self {
        self.max_concurrent_subpage_requests = cap.max(1);
        self.subpage_request_timeout = timeout;
        self
    }
}

/// Parse an environment variable, logging and discarding bad values.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring unparseable value for {key}: {raw:?}");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ScrapeConfig::default();
        assert_eq!(cfg.max_concurrent_requests, 50);
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert_eq!(cfg.queue_timeout, Duration::from_secs(120));
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.max_contexts, 20);
        assert_eq!(cfg.min_contexts, 2);
        assert_eq!(cfg.default_subpages_count, 5);
        assert_eq!(cfg.restart_threshold, 1000);
    }

    #[test]
    fn builder_clamps_bounds() {
        let cfg = ScrapeConfig::default().with_context_bounds(8, 4);
        assert_eq!(cfg.max_contexts, 4);
        assert_eq!(cfg.min_contexts, 4);

        let cfg = ScrapeConfig::default().with_max_concurrent_requests(0);
        assert_eq!(cfg.max_concurrent_requests, 1);
    }
}
