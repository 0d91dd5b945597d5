//! Aggregated crawl result types.

use serde::Serialize;

use crate::error::ErrorInfo;
use crate::page_scraper::types::{LinkBundle, ScrapeOutcome};

/// Options accepted by `scrape_website`.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// K: subpages to crawl beyond the root. Falls back to the configured
    /// default when unset.
    pub subpages_count: Option<usize>,
    /// Keywords boosting matching subpage paths during selection.
    pub keywords: Vec<String>,
    /// Overrides the default excluded path prefixes when set.
    pub exclude_patterns: Option<Vec<String>>,
    /// Maximum path depth for subpage candidates.
    pub max_depth: Option<usize>,
}

/// One line per attempted subpage in the aggregated result.
#[derive(Debug, Clone, Serialize)]
pub struct SubpageSummary {
    pub url: String,
    pub title: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Crawl bookkeeping.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    /// K as requested by the caller.
    pub requested: usize,
    /// Subpages picked by selection.
    pub selected: usize,
    /// Subpages scraped successfully.
    pub processed: usize,
    /// Subpages that failed.
    pub failed: usize,
    pub page_urls: usize,
    pub social_urls: usize,
    pub contact_urls: usize,
    pub image_urls: usize,
    pub external_urls: usize,
}

/// Result of a whole-site crawl: the root scrape, per-subpage outcomes,
/// the merged link graph, and a combined markdown document.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    pub main_result: ScrapeOutcome,
    pub subpages: Vec<SubpageSummary>,
    pub links: LinkBundle,
    pub combined_markdown: String,
    pub stats: CrawlStats,
}
