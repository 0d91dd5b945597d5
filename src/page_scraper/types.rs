//! Result types produced by a single page scrape.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ErrorInfo;

/// Metadata pulled from the document head.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub page_type: Option<String>,
    pub lang: Option<String>,
    pub og_image: Option<String>,
}

/// Contact-link categories recognized by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Email,
    Calendar,
    Meeting,
    Form,
    Chat,
}

impl ContactKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Calendar => "calendar",
            Self::Meeting => "meeting",
            Self::Form => "form",
            Self::Chat => "chat",
        }
    }
}

/// Categorized URLs extracted from a page. Every set is keyed by URL, so
/// merging is plain set union; ordered maps keep output deterministic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkBundle {
    /// Same-origin page links (crawl candidates).
    pub page_urls: BTreeSet<String>,
    /// URL -> platform name.
    pub social_urls: BTreeMap<String, String>,
    /// URL -> contact category.
    pub contact_urls: BTreeMap<String, ContactKind>,
    pub image_urls: BTreeSet<String>,
    pub external_urls: BTreeSet<String>,
}

impl LinkBundle {
    /// Union another bundle into this one.
    pub fn merge(&mut self, other: LinkBundle) {
        self.page_urls.extend(other.page_urls);
        self.social_urls.extend(other.social_urls);
        self.contact_urls.extend(other.contact_urls);
        self.image_urls.extend(other.image_urls);
        self.external_urls.extend(other.external_urls);
    }

    /// A URL recognized as social must not also count as generic external.
    /// Applied once per scrape and once more after a crawl-level merge.
    pub fn remove_social_from_external(&mut self) {
        for url in self.social_urls.keys() {
            self.external_urls.remove(url);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.page_urls.is_empty()
            && self.social_urls.is_empty()
            && self.contact_urls.is_empty()
            && self.image_urls.is_empty()
            && self.external_urls.is_empty()
    }
}

/// The outcome of scraping one URL.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub url: String,
    pub metadata: PageMetadata,
    /// Cleaned readable text of the page's main article.
    pub main_content: String,
    /// Structured markdown rendition (title, core content, link sections).
    pub markdown: String,
    pub links: LinkBundle,
    pub footer: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Raw anchor as reported by the in-page extraction script.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLink {
    pub url: String,
    #[serde(default)]
    pub text: String,
}

/// Raw head metadata as reported by the in-page extraction script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetadata {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub page_type: Option<String>,
    pub lang: Option<String>,
    pub og_image: Option<String>,
}

/// Payload of the single-round-trip page extraction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPageExtract {
    #[serde(default)]
    pub metadata: RawMetadata,
    #[serde(default)]
    pub nav_links: Vec<RawLink>,
    #[serde(default)]
    pub links: Vec<RawLink>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub footer_text: String,
    #[serde(default)]
    pub body_text: String,
}

impl From<RawMetadata> for PageMetadata {
    fn from(raw: RawMetadata) -> Self {
        Self {
            title: raw.title,
            description: raw.description.filter(|s| !s.is_empty()),
            site_name: raw.site_name.filter(|s| !s.is_empty()),
            page_type: raw.page_type.filter(|s| !s.is_empty()),
            lang: raw.lang.filter(|s| !s.is_empty()),
            og_image: raw.og_image.filter(|s| !s.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_all_buckets() {
        let mut a = LinkBundle::default();
        a.page_urls.insert("https://x.com/a".into());
        a.external_urls.insert("https://other.com".into());

        let mut b = LinkBundle::default();
        b.page_urls.insert("https://x.com/a".into());
        b.page_urls.insert("https://x.com/b".into());
        b.social_urls
            .insert("https://twitter.com/x".into(), "twitter".into());

        a.merge(b);
        assert_eq!(a.page_urls.len(), 2);
        assert_eq!(a.social_urls.len(), 1);
        assert_eq!(a.external_urls.len(), 1);
    }

    #[test]
    fn social_wins_over_external() {
        let mut bundle = LinkBundle::default();
        bundle
            .social_urls
            .insert("https://twitter.com/x".into(), "twitter".into());
        bundle.external_urls.insert("https://twitter.com/x".into());
        bundle.external_urls.insert("https://blog.example.com/".into());

        bundle.remove_social_from_external();
        assert!(!bundle.external_urls.contains("https://twitter.com/x"));
        assert!(bundle.external_urls.contains("https://blog.example.com/"));
    }
}
