//! Deterministic subpage selection.
//!
//! Scores the root page's internal links and picks the K most promising
//! subpages. The procedure is fully deterministic: same link graph in,
//! same selection out, with ties broken by first-seen order.

use url::Url;

use crate::utils::url_utils::{path_depth, same_site};

/// Path prefixes excluded from crawling by default: auth flows, legal
/// boilerplate, and commerce funnels that never carry article content.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "/login",
    "/signin",
    "/signup",
    "/register",
    "/account",
    "/privacy",
    "/terms",
    "/cookies",
    "/gdpr",
    "/contact",
    "/cart",
    "/checkout",
    "/basket",
    "/purchase",
    "/buy",
];

/// Sections that usually hold the pages worth crawling.
pub const IMPORTANT_SECTIONS: &[&str] = &["/about", "/products", "/services", "/faq", "/features"];

/// Selection parameters, resolved from the crawl request plus config
/// defaults.
#[derive(Debug, Clone)]
pub struct SubpageOptions {
    /// K: how many subpages to select.
    pub count: usize,
    pub keywords: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_depth: usize,
}

impl Default for SubpageOptions {
    fn default() -> Self {
        Self {
            count: 5,
            keywords: Vec::new(),
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_depth: 2,
        }
    }
}

#[derive(Debug)]
struct Candidate {
    url: Url,
    key: String,
    score: i64,
    seen: usize,
}

/// Comparison key: normalized URL with any trailing slash dropped, so
/// `/about` and `/about/` count as one page.
fn dedup_key(url: &Url) -> String {
    let s = url.as_str();
    s.strip_suffix('/').unwrap_or(s).to_string()
}

/// Score and select the best `opts.count` subpages from the candidates.
///
/// Candidates are filtered to the root's site, capped at `max_depth` path
/// segments, and stripped of excluded sections; survivors are scored by
/// shallowness, path brevity, keyword hits, and important-section hits.
#[must_use]
pub fn select_subpages<'a, I>(root: &Url, candidates: I, opts: &SubpageOptions) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let root_key = dedup_key(root);
    let max_depth = opts.max_depth as i64;
    let keywords: Vec<String> = opts
        .keywords
        .iter()
        .map(|k| k.to_ascii_lowercase())
        .collect();

    let mut scored = Vec::new();

    for (seen, raw) in candidates.into_iter().enumerate() {
        let Ok(mut url) = Url::parse(raw) else {
            continue;
        };
        url.set_fragment(None);

        if !same_site(root, &url) {
            continue;
        }

        let path = url.path().to_ascii_lowercase();
        if opts
            .exclude_patterns
            .iter()
            .any(|pattern| path.starts_with(pattern.as_str()))
        {
            continue;
        }

        let depth = path_depth(&url) as i64;
        if depth > max_depth {
            continue;
        }

        let keyword_hits = keywords.iter().filter(|k| path.contains(k.as_str())).count() as i64;
        let section_hits = IMPORTANT_SECTIONS
            .iter()
            .filter(|section| path.starts_with(*section))
            .count() as i64;

        let score = (max_depth - depth) * 10
            + (100 - path.len() as i64).max(0)
            + 20 * keyword_hits
            + 15 * section_hits;

        let key = dedup_key(&url);
        scored.push(Candidate {
            url,
            key,
            score,
            seen,
        });
    }

    // Highest score first; first-seen order breaks ties.
    scored.sort_by_key(|c| (-c.score, c.seen));

    let mut selected = Vec::with_capacity(opts.count);
    let mut taken_keys = Vec::new();

    for candidate in scored.into_iter().take(opts.count * 2) {
        if selected.len() >= opts.count {
            break;
        }
        if candidate.key == root_key || taken_keys.contains(&candidate.key) {
            continue;
        }
        taken_keys.push(candidate.key);
        selected.push(candidate.url.to_string());
    }

    selected
}
