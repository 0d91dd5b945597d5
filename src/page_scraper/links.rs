//! Link classification.
//!
//! Buckets every anchor a page exposes into social, contact, internal, or
//! external sets using fixed platform tables, and scans body text for
//! plain e-mail addresses. Runs entirely in Rust over the raw anchors the
//! page round-trip returned, so every rule here is unit-testable.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use super::types::{ContactKind, LinkBundle, RawLink, RawPageExtract};
use crate::config::ScrapeConfig;
use crate::utils::url_utils::{resolve_href, same_site};

/// Social platforms by host substring.
pub const SOCIAL_PLATFORMS: &[(&str, &[&str])] = &[
    ("twitter", &["twitter.com", "t.co"]),
    ("facebook", &["facebook.com", "fb.com"]),
    ("instagram", &["instagram.com"]),
    ("linkedin", &["linkedin.com"]),
    ("youtube", &["youtube.com"]),
    ("tiktok", &["tiktok.com"]),
    ("reddit", &["reddit.com"]),
    ("github", &["github.com"]),
];

/// Contact services by host substring.
pub const CONTACT_SERVICES: &[(ContactKind, &[&str])] = &[
    (
        ContactKind::Calendar,
        &[
            "calendly.com",
            "cal.com",
            "youcanbook.me",
            "meetingbird.com",
            "doodle.com",
            "meetbot",
        ],
    ),
    (
        ContactKind::Meeting,
        &[
            "meet.google.com",
            "zoom.us",
            "teams.microsoft.com",
            "webex.com",
            "gotomeeting.com",
        ],
    ),
    (
        ContactKind::Form,
        &[
            "forms.",
            "typeform",
            "surveymonkey",
            "formstack",
            "wufoo",
            "jotform",
        ],
    ),
    (
        ContactKind::Chat,
        &[
            "intercom", "zendesk", "livechat", "tawk.to", "drift.com", "olark", "chatwoot",
        ],
    ),
];

/// Maximum scanned e-mail addresses added per page.
pub const MAX_SCANNED_EMAILS: usize = 5;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .expect("BUG: hardcoded email regex is invalid")
});

/// Which social platform a host belongs to, if any.
#[must_use]
pub fn social_platform(host: &str) -> Option<&'static str> {
    let host = host.to_ascii_lowercase();
    SOCIAL_PLATFORMS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| host.contains(p)))
        .map(|(platform, _)| *platform)
}

/// Which contact service a host belongs to, if any.
#[must_use]
pub fn contact_service(host: &str) -> Option<ContactKind> {
    let host = host.to_ascii_lowercase();
    CONTACT_SERVICES
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| host.contains(p)))
        .map(|(kind, _)| *kind)
}

/// Classify everything the page extraction returned into a link bundle.
pub fn build_link_bundle(base: &Url, extract: &RawPageExtract, config: &ScrapeConfig) -> LinkBundle {
    let mut bundle = LinkBundle::default();

    classify_anchors(base, &extract.links, config.page_links_cap, &mut bundle);
    // Navigation anchors also count as crawl candidates when internal.
    classify_anchors(base, &extract.nav_links, config.page_links_cap, &mut bundle);

    for src in &extract.images {
        if let Some(resolved) = resolve_href(base, src) {
            bundle.image_urls.insert(resolved.to_string());
        }
    }

    scan_emails(&extract.body_text, &mut bundle);
    bundle.remove_social_from_external();
    bundle
}

fn classify_anchors(base: &Url, anchors: &[RawLink], page_cap: usize, bundle: &mut LinkBundle) {
    for anchor in anchors {
        let href = anchor.url.trim();
        if href.is_empty() {
            continue;
        }

        if let Some(address) = href.strip_prefix("mailto:") {
            let address = address.split('?').next().unwrap_or(address);
            if !address.is_empty() {
                bundle
                    .contact_urls
                    .insert(format!("mailto:{address}"), ContactKind::Email);
            }
            continue;
        }

        let Some(resolved) = resolve_href(base, href) else {
            continue;
        };
        let Some(host) = resolved.host_str() else {
            continue;
        };

        if let Some(platform) = social_platform(host) {
            bundle
                .social_urls
                .insert(resolved.to_string(), platform.to_string());
            continue;
        }

        if let Some(kind) = contact_service(host) {
            bundle.contact_urls.insert(resolved.to_string(), kind);
            continue;
        }

        if same_site(base, &resolved) {
            if bundle.page_urls.len() < page_cap {
                bundle.page_urls.insert(resolved.to_string());
            }
        } else {
            bundle.external_urls.insert(resolved.to_string());
        }
    }
}

/// Scan visible body text for e-mail addresses and add the first few
/// unique hits as contact entries.
fn scan_emails(body_text: &str, bundle: &mut LinkBundle) {
    let mut added = 0;
    for m in EMAIL_RE.find_iter(body_text) {
        if added >= MAX_SCANNED_EMAILS {
            break;
        }
        let key = format!("mailto:{}", m.as_str());
        if bundle.contact_urls.insert(key, ContactKind::Email).is_none() {
            added += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_scraper::types::RawMetadata;

    fn extract_with_links(links: Vec<RawLink>) -> RawPageExtract {
        RawPageExtract {
            metadata: RawMetadata::default(),
            nav_links: Vec::new(),
            links,
            images: Vec::new(),
            footer_text: String::new(),
            body_text: String::new(),
        }
    }

    fn link(url: &str) -> RawLink {
        RawLink {
            url: url.to_string(),
            text: String::new(),
        }
    }

    #[test]
    fn platform_tables_match_hosts() {
        assert_eq!(social_platform("twitter.com"), Some("twitter"));
        assert_eq!(social_platform("www.t.co"), Some("twitter"));
        assert_eq!(social_platform("github.com"), Some("github"));
        assert_eq!(social_platform("example.com"), None);

        assert_eq!(contact_service("calendly.com"), Some(ContactKind::Calendar));
        assert_eq!(contact_service("zoom.us"), Some(ContactKind::Meeting));
        assert_eq!(contact_service("forms.gle"), Some(ContactKind::Form));
        assert_eq!(contact_service("tawk.to"), Some(ContactKind::Chat));
        assert_eq!(contact_service("example.com"), None);
    }

    #[test]
    fn classification_buckets_are_disjoint() {
        let base = Url::parse("https://example.com/").unwrap();
        let extract = extract_with_links(vec![
            link("https://twitter.com/x"),
            link("https://blog.example.org"),
            link("mailto:a@b.com"),
            link("https://calendly.com/x"),
            link("/about"),
        ]);

        let bundle = build_link_bundle(&base, &extract, &ScrapeConfig::default());

        assert_eq!(
            bundle.social_urls.get("https://twitter.com/x"),
            Some(&"twitter".to_string())
        );
        assert!(bundle.external_urls.contains("https://blog.example.org/"));
        assert!(!bundle.external_urls.contains("https://twitter.com/x"));
        assert_eq!(
            bundle.contact_urls.get("mailto:a@b.com"),
            Some(&ContactKind::Email)
        );
        assert_eq!(
            bundle.contact_urls.get("https://calendly.com/x"),
            Some(&ContactKind::Calendar)
        );
        assert!(bundle.page_urls.contains("https://example.com/about"));
    }

    #[test]
    fn www_counts_as_same_site() {
        let base = Url::parse("https://www.example.com/").unwrap();
        let extract = extract_with_links(vec![link("https://example.com/pricing")]);
        let bundle = build_link_bundle(&base, &extract, &ScrapeConfig::default());
        assert!(bundle.page_urls.contains("https://example.com/pricing"));
        assert!(bundle.external_urls.is_empty());
    }

    #[test]
    fn email_scan_caps_at_five_unique() {
        let mut extract = extract_with_links(Vec::new());
        extract.body_text = (0..10)
            .map(|i| format!("contact person{i}@example.com now"))
            .collect::<Vec<_>>()
            .join(" ");
        // Duplicate of the first address must not consume a slot.
        extract.body_text.push_str(" person0@example.com");

        let bundle = build_link_bundle(
            &Url::parse("https://example.com/").unwrap(),
            &extract,
            &ScrapeConfig::default(),
        );
        assert_eq!(bundle.contact_urls.len(), MAX_SCANNED_EMAILS);
        assert!(bundle
            .contact_urls
            .values()
            .all(|k| *k == ContactKind::Email));
    }

    #[test]
    fn page_links_respect_cap() {
        let base = Url::parse("https://example.com/").unwrap();
        let links = (0..100)
            .map(|i| link(&format!("https://example.com/page{i}")))
            .collect();
        let config = ScrapeConfig::default();
        let bundle = build_link_bundle(&base, &extract_with_links(links), &config);
        assert_eq!(bundle.page_urls.len(), config.page_links_cap);
    }

    #[test]
    fn mailto_query_params_are_stripped() {
        let base = Url::parse("https://example.com/").unwrap();
        let extract = extract_with_links(vec![link("mailto:sales@example.com?subject=Hi")]);
        let bundle = build_link_bundle(&base, &extract, &ScrapeConfig::default());
        assert!(bundle.contact_urls.contains_key("mailto:sales@example.com"));
    }
}
