//! Readable-article extraction.
//!
//! The scraper treats article extraction as a pluggable collaborator: the
//! [`ArticleExtractor`] trait takes raw HTML and returns the readable
//! subset. The default implementation walks a cascade of semantic content
//! selectors and falls back to `<body>`.

use anyhow::Result;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

/// Maximum HTML input size (10 MB). Protects against memory exhaustion
/// while accommodating the largest real-world pages.
const MAX_HTML_SIZE: usize = 10 * 1024 * 1024;

/// The readable subset of a page.
#[derive(Debug, Clone, Default)]
pub struct Article {
    pub title: String,
    pub text_content: String,
    pub html_content: String,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    pub lang: Option<String>,
}

/// Converts raw HTML into a readable article. Implementations must be
/// pure: same HTML in, same article out.
pub trait ArticleExtractor: Send + Sync {
    fn extract(&self, html: &str, url: &Url) -> Result<Article>;
}

// Hardcoded selectors never fail to parse; if one does, it's a bug caught
// by the unit tests below.

static CONTENT_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        "article",
        "[role='main']",
        "#main-content",
        ".main-content",
        "#content",
        ".content",
        ".post-content",
        ".entry-content",
        "[itemprop='articleBody']",
        ".article-body",
        ".story-body",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("BUG: hardcoded CSS selector is invalid"))
    .collect()
});

static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("BUG: hardcoded CSS selector is invalid"));

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("BUG: hardcoded CSS selector is invalid"));

static OG_TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("meta[property='og:title']").expect("BUG: hardcoded CSS selector is invalid")
});

static OG_SITE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("meta[property='og:site_name']")
        .expect("BUG: hardcoded CSS selector is invalid")
});

static DESCRIPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("meta[name='description']").expect("BUG: hardcoded CSS selector is invalid")
});

static HTML_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("html").expect("BUG: hardcoded CSS selector is invalid"));

static NOISE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script, style, noscript").expect("BUG: hardcoded CSS selector is invalid")
});

/// Default extractor: semantic-container cascade over a DOM parse.
#[derive(Debug, Default, Clone, Copy)]
pub struct DomArticleExtractor;

impl ArticleExtractor for DomArticleExtractor {
    fn extract(&self, html: &str, url: &Url) -> Result<Article> {
        if html.len() > MAX_HTML_SIZE {
            anyhow::bail!(
                "HTML input too large: {} bytes (maximum {} bytes)",
                html.len(),
                MAX_HTML_SIZE
            );
        }

        let document = Html::parse_document(html);

        let container = CONTENT_SELECTORS
            .iter()
            .find_map(|sel| document.select(sel).next())
            .or_else(|| document.select(&BODY_SELECTOR).next());

        let (html_content, raw_text) = match container {
            Some(element) => {
                let fragment = Html::parse_fragment(&element.html());
                let noise: Vec<String> = fragment
                    .select(&NOISE_SELECTOR)
                    .map(|noisy| noisy.html())
                    .collect();
                let mut cleaned_html = element.html();
                for chunk in noise {
                    cleaned_html = cleaned_html.replace(&chunk, "");
                }
                // Text comes from the cleaned fragment so script/style
                // bodies never leak into the article.
                let cleaned_fragment = Html::parse_fragment(&cleaned_html);
                let text = cleaned_fragment
                    .root_element()
                    .text()
                    .collect::<Vec<_>>()
                    .join(" ");
                (cleaned_html, text)
            }
            None => (html.to_string(), String::new()),
        };

        let text_content = clean_text(&raw_text);
        if text_content.is_empty() {
            anyhow::bail!("article extraction produced no readable text for {url}");
        }

        let title = meta_content(&document, &OG_TITLE_SELECTOR)
            .or_else(|| {
                document
                    .select(&TITLE_SELECTOR)
                    .next()
                    .map(|t| t.text().collect::<String>().trim().to_string())
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.host_str().unwrap_or("Untitled").to_string());

        let excerpt = meta_content(&document, &DESCRIPTION_SELECTOR)
            .or_else(|| Some(truncate_chars(&text_content, 200)))
            .filter(|s| !s.is_empty());

        let lang = document
            .select(&HTML_SELECTOR)
            .next()
            .and_then(|html_el| html_el.value().attr("lang"))
            .map(ToString::to_string)
            .filter(|s| !s.is_empty());

        Ok(Article {
            title,
            text_content,
            html_content,
            excerpt,
            site_name: meta_content(&document, &OG_SITE_SELECTOR),
            lang,
        })
    }
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Normalize extracted text: tabs become spaces, runs of whitespace
/// collapse, lines are trimmed, and blank-line runs shrink to one.
#[must_use]
pub fn clean_text(raw: &str) -> String {
    let mut lines = Vec::new();
    let mut last_blank = true;

    for line in raw.replace('\t', " ").lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !last_blank {
                lines.push(String::new());
                last_blank = true;
            }
        } else {
            lines.push(collapsed);
            last_blank = false;
        }
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    lines.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Result<Article> {
        DomArticleExtractor.extract(html, &Url::parse("https://example.com/post").unwrap())
    }

    #[test]
    fn prefers_main_over_body() {
        let html = r"
            <html><head><title>Site</title></head><body>
                <nav>Navigation junk</nav>
                <main><p>Main content here</p></main>
                <footer>Footer junk</footer>
            </body></html>
        ";
        let article = extract(html).unwrap();
        assert!(article.text_content.contains("Main content here"));
        assert!(!article.text_content.contains("Navigation junk"));
        assert_eq!(article.title, "Site");
    }

    #[test]
    fn falls_back_to_body() {
        let html = r"
            <html><body><div><p>Just body content</p></div></body></html>
        ";
        let article = extract(html).unwrap();
        assert!(article.text_content.contains("Just body content"));
    }

    #[test]
    fn og_title_takes_priority() {
        let html = r#"
            <html><head>
                <title>Plain title</title>
                <meta property="og:title" content="OG Title">
                <meta property="og:site_name" content="Example Site">
            </head><body><main><p>Text</p></main></body></html>
        "#;
        let article = extract(html).unwrap();
        assert_eq!(article.title, "OG Title");
        assert_eq!(article.site_name.as_deref(), Some("Example Site"));
    }

    #[test]
    fn empty_page_is_an_error() {
        let html = "<html><body><main><script>var x = 1;</script></main></body></html>";
        assert!(extract(html).is_err());
    }

    #[test]
    fn lang_attribute_is_captured() {
        let html = r#"<html lang="de"><body><main><p>Hallo Welt</p></main></body></html>"#;
        let article = extract(html).unwrap();
        assert_eq!(article.lang.as_deref(), Some("de"));
    }

    #[test]
    fn clean_text_normalizes_whitespace() {
        let raw = "Line\tone  has\t\ttabs\n\n\n\n   spaced   line   \n\n";
        assert_eq!(clean_text(raw), "Line one has tabs\n\nspaced line");
    }

    #[test]
    fn oversized_input_is_rejected() {
        let html = "x".repeat(MAX_HTML_SIZE + 1);
        assert!(extract(&html).is_err());
    }
}
