//! Environment-driven configuration.

use std::time::Duration;

use sitesift::ScrapeConfig;

#[test]
fn env_overrides_apply_and_bad_values_fall_back() {
    // All keys in one test: env vars are process-global state.
    std::env::set_var("MAX_CONCURRENT_REQUESTS", "7");
    std::env::set_var("REQUEST_TIMEOUT_MS", "1500");
    std::env::set_var("QUEUE_TIMEOUT_MS", "2500");
    std::env::set_var("MAX_RETRIES", "3");
    std::env::set_var("MAX_CONTEXTS", "9");
    std::env::set_var("MIN_CONTEXTS", "4");
    std::env::set_var("SUBPAGE_REQUEST_TIMEOUT_MS", "9000");
    std::env::set_var("DEFAULT_SUBPAGES_COUNT", "not-a-number");

    let cfg = ScrapeConfig::from_env();

    assert_eq!(cfg.max_concurrent_requests, 7);
    assert_eq!(cfg.request_timeout, Duration::from_millis(1500));
    assert_eq!(cfg.queue_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.max_retries, 3);
    assert_eq!(cfg.max_contexts, 9);
    assert_eq!(cfg.min_contexts, 4);
    assert_eq!(cfg.subpage_request_timeout, Duration::from_millis(9000));
    // Unparseable value falls back to the default.
    assert_eq!(cfg.default_subpages_count, 5);

    for key in [
        "MAX_CONCURRENT_REQUESTS",
        "REQUEST_TIMEOUT_MS",
        "QUEUE_TIMEOUT_MS",
        "MAX_RETRIES",
        "MAX_CONTEXTS",
        "MIN_CONTEXTS",
        "SUBPAGE_REQUEST_TIMEOUT_MS",
        "DEFAULT_SUBPAGES_COUNT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn min_contexts_never_exceeds_max() {
    let cfg = ScrapeConfig::default().with_context_bounds(10, 3);
    assert!(cfg.min_contexts <= cfg.max_contexts);
}
