//! Markdown assembly for scrape results.
//!
//! The document layout is fixed: title, core content, then the link
//! sections. All links and images are emitted in reference style with the
//! definitions collected once at the end of the document.

use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;

use super::types::LinkBundle;
use crate::config::ScrapeConfig;
use crate::page_scraper::types::RawLink;

static INLINE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Matches inline links and images: optional '!', [text](target).
    Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("BUG: hardcoded markdown regex is invalid")
});

static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("BUG: hardcoded blank-line regex is invalid"));

/// Collects reference-style link definitions as sections are written.
#[derive(Debug, Default)]
struct ReferenceTable {
    refs: Vec<String>,
}

impl ReferenceTable {
    /// Register a target and return its 1-based reference index.
    fn add(&mut self, target: &str) -> usize {
        if let Some(pos) = self.refs.iter().position(|r| r == target) {
            return pos + 1;
        }
        self.refs.push(target.to_string());
        self.refs.len()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (i, target) in self.refs.iter().enumerate() {
            let _ = writeln!(out, "[{}]: {}", i + 1, target);
        }
        out
    }
}

/// Rewrite inline links/images in converted markdown to reference style,
/// registering each target in the table.
fn to_reference_style(markdown: &str, refs: &mut ReferenceTable) -> String {
    INLINE_LINK_RE
        .replace_all(markdown, |caps: &regex::Captures<'_>| {
            let bang = &caps[1];
            let text = &caps[2];
            let idx = refs.add(&caps[3]);
            format!("{bang}[{text}][{idx}]")
        })
        .into_owned()
}

/// Collapse runs of 3+ blank lines down to a single blank line.
fn collapse_blank_runs(markdown: &str) -> String {
    BLANK_RUN_RE.replace_all(markdown, "\n\n").into_owned()
}

/// Build the full markdown document for a scraped page.
#[must_use]
pub fn build_markdown(
    title: &str,
    article_html: &str,
    nav_links: &[RawLink],
    bundle: &LinkBundle,
    footer: &str,
    config: &ScrapeConfig,
) -> String {
    let mut refs = ReferenceTable::default();
    let mut doc = String::new();

    let _ = writeln!(doc, "# {}\n", title.trim());

    doc.push_str("## Core Content\n\n");
    let core = to_reference_style(&html2md::parse_html(article_html), &mut refs);
    doc.push_str(core.trim());
    doc.push_str("\n\n");

    if !nav_links.is_empty() {
        doc.push_str("## Navigation\n\n");
        for link in nav_links.iter().take(config.nav_links_cap) {
            let label = if link.text.is_empty() {
                link.url.as_str()
            } else {
                link.text.as_str()
            };
            let idx = refs.add(&link.url);
            let _ = writeln!(doc, "- [{label}][{idx}]");
        }
        doc.push('\n');
    }

    if !bundle.social_urls.is_empty() {
        doc.push_str("## Social Media\n\n");
        for (url, platform) in &bundle.social_urls {
            let idx = refs.add(url);
            let _ = writeln!(doc, "- [{platform}][{idx}]");
        }
        doc.push('\n');
    }

    if !bundle.contact_urls.is_empty() {
        doc.push_str("## Contact Information\n\n");
        for (url, kind) in &bundle.contact_urls {
            let idx = refs.add(url);
            let _ = writeln!(doc, "- [{}][{idx}]", kind.label());
        }
        doc.push('\n');
    }

    if !footer.trim().is_empty() {
        doc.push_str("## Footer\n\n");
        doc.push_str(footer.trim());
        doc.push_str("\n\n");
    }

    let definitions = refs.render();
    if !definitions.is_empty() {
        doc.push_str(&definitions);
    }

    collapse_blank_runs(&doc).trim_end().to_string() + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_scraper::types::ContactKind;

    fn nav(url: &str, text: &str) -> RawLink {
        RawLink {
            url: url.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn sections_appear_in_order() {
        let mut bundle = LinkBundle::default();
        bundle
            .social_urls
            .insert("https://twitter.com/x".into(), "twitter".into());
        bundle
            .contact_urls
            .insert("mailto:a@b.com".into(), ContactKind::Email);

        let md = build_markdown(
            "Example",
            "<p>Hello <a href=\"https://example.com/more\">more</a></p>",
            &[nav("https://example.com/about", "About")],
            &bundle,
            "© Example Inc",
            &ScrapeConfig::default(),
        );

        let title_pos = md.find("# Example").unwrap();
        let core_pos = md.find("## Core Content").unwrap();
        let nav_pos = md.find("## Navigation").unwrap();
        let social_pos = md.find("## Social Media").unwrap();
        let contact_pos = md.find("## Contact Information").unwrap();
        let footer_pos = md.find("## Footer").unwrap();
        assert!(title_pos < core_pos);
        assert!(core_pos < nav_pos);
        assert!(nav_pos < social_pos);
        assert!(social_pos < contact_pos);
        assert!(contact_pos < footer_pos);
    }

    #[test]
    fn links_are_reference_style_with_definitions_at_end() {
        let md = build_markdown(
            "T",
            "<p>See <a href=\"https://example.com/a\">a</a></p>",
            &[nav("https://example.com/b", "B")],
            &LinkBundle::default(),
            "",
            &ScrapeConfig::default(),
        );

        assert!(md.contains("[a][1]"));
        assert!(md.contains("[B][2]"));
        let defs_pos = md.find("[1]: https://example.com/a").unwrap();
        assert!(md.find("[2]: https://example.com/b").unwrap() > defs_pos);
        // Definitions come after every section.
        assert!(defs_pos > md.find("## Navigation").unwrap());
    }

    #[test]
    fn duplicate_targets_share_one_reference() {
        let mut refs = ReferenceTable::default();
        assert_eq!(refs.add("https://x.com"), 1);
        assert_eq!(refs.add("https://y.com"), 2);
        assert_eq!(refs.add("https://x.com"), 1);
        assert_eq!(refs.render().lines().count(), 2);
    }

    #[test]
    fn blank_runs_collapse() {
        let collapsed = collapse_blank_runs("a\n\n\n\n\nb");
        assert_eq!(collapsed, "a\n\nb");
    }

    #[test]
    fn images_become_reference_style() {
        let mut refs = ReferenceTable::default();
        let out = to_reference_style("![alt](https://x.com/i.png) and [t](https://y.com)", &mut refs);
        assert_eq!(out, "![alt][1] and [t][2]");
    }

    #[test]
    fn empty_sections_are_omitted() {
        let md = build_markdown(
            "T",
            "<p>text</p>",
            &[],
            &LinkBundle::default(),
            "",
            &ScrapeConfig::default(),
        );
        assert!(!md.contains("## Navigation"));
        assert!(!md.contains("## Social Media"));
        assert!(!md.contains("## Footer"));
    }
}
