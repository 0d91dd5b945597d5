//! JavaScript evaluation scripts
//!
//! This module contains the JavaScript code used to extract data from web
//! pages. The main extraction is a single IIFE so one evaluate round-trip
//! returns everything the classifier needs.

/// Build the combined page-extraction script.
///
/// `body_window` and `footer_max` bound how much text crosses the CDP
/// boundary; they are performance floors, not correctness limits.
pub fn page_extract_script(body_window: usize, footer_max: usize) -> String {
    format!(
        r#"
    (() => {{
        const meta = {{}};
        document.querySelectorAll('meta').forEach(tag => {{
            const name = tag.getAttribute('name') || tag.getAttribute('property');
            if (name) {{
                meta[name] = tag.getAttribute('content');
            }}
        }});

        const absolutize = (href) => {{
            try {{
                const abs = new URL(href, window.location.href);
                if (!['http:', 'https:', 'mailto:'].includes(abs.protocol)) return null;
                return abs.href;
            }} catch (e) {{
                return null;
            }}
        }};

        const collectLinks = (root) => {{
            const seen = new Set();
            const out = [];
            root.querySelectorAll('a[href]').forEach(a => {{
                const url = absolutize(a.getAttribute('href'));
                if (!url || seen.has(url)) return;
                seen.add(url);
                out.push({{ url: url, text: (a.textContent || '').trim() }});
            }});
            return out;
        }};

        const navRoot = document.querySelector('nav, header nav, [role="navigation"]');
        const footerEl = document.querySelector('footer, [role="contentinfo"]');

        const images = [];
        const seenImages = new Set();
        document.querySelectorAll('img[src]').forEach(img => {{
            const url = absolutize(img.getAttribute('src'));
            if (url && !seenImages.has(url)) {{
                seenImages.add(url);
                images.push(url);
            }}
        }});

        return {{
            metadata: {{
                title: (meta['og:title'] || document.title || '').trim(),
                description: meta['description'] || meta['og:description'] || null,
                siteName: meta['og:site_name'] || null,
                pageType: meta['og:type'] || null,
                lang: document.documentElement.lang || null,
                ogImage: absolutize(meta['og:image'] || '') || null
            }},
            navLinks: navRoot ? collectLinks(navRoot) : [],
            links: collectLinks(document),
            images: images,
            footerText: footerEl ? (footerEl.innerText || '').trim().substring(0, {footer_max}) : '',
            bodyText: (document.body ? document.body.innerText || '' : '').substring(0, {body_window})
        }};
    }})()
"#
    )
}

/// Detect signals that the page loads content lazily or on scroll.
pub const DYNAMIC_CONTENT_SCRIPT: &str = r"
    (() => {
        if (document.querySelector('[data-lazy], [data-src], [loading=\'lazy\']')) return true;
        if (document.querySelector('.infinite-scroll, .load-more, #infinite, .pagination')) return true;
        const source = document.documentElement.innerHTML.toLowerCase();
        if (source.includes('scroll') && (source.includes('load-more') || source.includes('infinite'))) return true;
        return false;
    })()
";

/// Current scroll geometry.
pub const SCROLL_STATE_SCRIPT: &str = r"
    (() => ({
        height: document.body ? document.body.scrollHeight : 0,
        y: window.scrollY,
        viewport: window.innerHeight
    }))()
";

/// Whether W3C Navigation Timing reports the load event as finished.
/// Pages without the API count as settled.
pub const NAV_TIMING_SETTLED_SCRIPT: &str = r"
    (() => {
        if (!window.performance || !performance.getEntriesByType) return true;
        const nav = performance.getEntriesByType('navigation')[0];
        if (!nav) return true;
        return nav.loadEventEnd > 0;
    })()
";

/// One scroll step.
pub fn scroll_by_script(pixels: u32) -> String {
    format!("window.scrollBy(0, {pixels})")
}

/// One full viewport scroll, the guaranteed minimum before scroll exit.
pub const SCROLL_VIEWPORT_SCRIPT: &str = "window.scrollBy(0, window.innerHeight)";

/// Return to the top after scrolling.
pub const SCROLL_TOP_SCRIPT: &str = "window.scrollTo(0, 0)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_script_embeds_windows() {
        let script = page_extract_script(15_000, 1_000);
        assert!(script.contains("substring(0, 15000)"));
        assert!(script.contains("substring(0, 1000)"));
        assert!(script.contains("navLinks"));
        assert!(script.contains("footerText"));
    }
}
