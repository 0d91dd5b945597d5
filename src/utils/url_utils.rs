//! URL validation and normalization utilities.
//!
//! All URL handling in the crawler and scraper funnels through these
//! helpers so that deduplication, origin comparison, and depth counting
//! agree on one normalized form.

use url::Url;

use crate::error::ScrapeError;

/// Normalize a raw user-supplied URL into canonical form.
///
/// Missing schemes get `https://` prepended, `http` is upgraded to
/// `https`, the host is lowercased by the parser, and fragment anchors are
/// stripped (they are client-side markers, not distinct resources).
pub fn normalize_url(raw: &str) -> Result<Url, ScrapeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScrapeError::MissingParam("url".to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut parsed = Url::parse(&candidate)
        .map_err(|e| ScrapeError::InvalidUrl(format!("{trimmed}: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" => {
            // set_scheme only fails for special-scheme transitions that
            // http -> https is not.
            let _ = parsed.set_scheme("https");
        }
        other => {
            return Err(ScrapeError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {trimmed}"
            )));
        }
    }

    if parsed.host_str().is_none() {
        return Err(ScrapeError::InvalidUrl(format!("{trimmed}: no host")));
    }

    parsed.set_fragment(None);
    Ok(parsed)
}

/// Check whether a string is a fetchable http(s) URL.
///
/// Skips data URLs, javascript URLs, and other non-http schemes.
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Host identity used for origin comparison: lowercase, leading `www.`
/// stripped.
#[must_use]
pub fn host_key(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
}

/// Whether two URLs belong to the same site for crawling purposes.
#[must_use]
pub fn same_site(a: &Url, b: &Url) -> bool {
    match (host_key(a), host_key(b)) {
        (Some(ha), Some(hb)) => ha == hb,
        _ => false,
    }
}

/// Path depth: the count of non-empty path segments.
///
/// `https://x.com/` has depth 0, `/products/x` has depth 2.
#[must_use]
pub fn path_depth(url: &Url) -> usize {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).count())
        .unwrap_or(0)
}

/// Resolve a possibly-relative href against a base, dropping anything that
/// does not land on http(s).
#[must_use]
pub fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let mut resolved = base.join(href.trim()).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme_and_upgrades_http() {
        let url = normalize_url("example.com/page").unwrap();
        assert_eq!(url.as_str(), "https://example.com/page");

        let url = normalize_url("http://Example.COM/Page#frag").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(matches!(
            normalize_url(""),
            Err(ScrapeError::MissingParam(_))
        ));
        assert!(matches!(
            normalize_url("ftp://example.com"),
            Err(ScrapeError::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_url("https://"),
            Err(ScrapeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn host_key_strips_www() {
        let a = Url::parse("https://www.example.com/a").unwrap();
        let b = Url::parse("https://example.com/b").unwrap();
        assert!(same_site(&a, &b));

        let c = Url::parse("https://blog.example.com").unwrap();
        assert!(!same_site(&a, &c));
    }

    #[test]
    fn path_depth_counts_non_empty_segments() {
        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(path_depth(&root), 0);

        let two = Url::parse("https://example.com/products/x").unwrap();
        assert_eq!(path_depth(&two), 2);

        let trailing = Url::parse("https://example.com/about/").unwrap();
        assert_eq!(path_depth(&trailing), 1);
    }

    #[test]
    fn resolve_href_handles_relative_and_rejects_non_http() {
        let base = Url::parse("https://example.com/docs/").unwrap();
        let resolved = resolve_href(&base, "../pricing").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/pricing");

        assert!(resolve_href(&base, "javascript:void(0)").is_none());
        assert!(resolve_href(&base, "mailto:a@b.com").is_none());
    }

    #[test]
    fn valid_url_filters_schemes() {
        assert!(is_valid_url("https://example.com"));
        assert!(!is_valid_url("data:text/html,hi"));
        assert!(!is_valid_url("mailto:a@b.com"));
        assert!(!is_valid_url(""));
    }
}
