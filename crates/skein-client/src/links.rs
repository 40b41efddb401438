//! Link discovery in HTML documents.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

/// Absolute http(s) URLs of every `<a href>` in `html`, in document order.
///
/// Relative links are resolved against `base`, or against a `<base href>`
/// element when the document has one. Fragments are removed and each URL is
/// returned once.
pub fn discover_links(html: &Html, base: &Url) -> Vec<Url> {
    let base = document_base(html, base);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in html.select(&anchors) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);
        if seen.insert(url.as_str().to_string()) {
            links.push(url);
        }
    }
    links
}

fn document_base(html: &Html, fallback: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|sel| html.select(&sel).next())
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| fallback.join(href.trim()).ok())
        .unwrap_or_else(|| fallback.clone())
}

/// Text of the first `<title>` element, whitespace-collapsed.
pub fn page_title(html: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = html.select(&selector).next()?;
    let text = title.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/index.html").unwrap()
    }

    #[test]
    fn test_resolves_relative_links() {
        let html = Html::parse_document(
            r#"<a href="intro.html">Intro</a>
               <a href="/about">About</a>
               <a href="https://other.org/x#frag">Other</a>"#,
        );
        let links: Vec<String> = discover_links(&html, &base())
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/docs/intro.html",
                "https://example.com/about",
                "https://other.org/x",
            ]
        );
    }

    #[test]
    fn test_skips_non_http_and_fragments() {
        let html = Html::parse_document(
            r##"<a href="#top">Top</a>
                <a href="mailto:me@example.com">Mail</a>
                <a href="javascript:void(0)">JS</a>
                <a href="">Empty</a>
                <a href="ok">Ok</a>"##,
        );
        let links = discover_links(&html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://example.com/docs/ok");
    }

    #[test]
    fn test_deduplicates_within_page() {
        let html = Html::parse_document(
            r#"<a href="/a">1</a><a href="/a#x">2</a><a href="https://example.com/a">3</a>"#,
        );
        assert_eq!(discover_links(&html, &base()).len(), 1);
    }

    #[test]
    fn test_honors_base_element() {
        let html = Html::parse_document(
            r#"<html><head><base href="https://cdn.example.com/root/"></head>
               <body><a href="page">P</a></body></html>"#,
        );
        let links = discover_links(&html, &base());
        assert_eq!(links[0].as_str(), "https://cdn.example.com/root/page");
    }

    #[test]
    fn test_page_title() {
        let html = Html::parse_document("<html><head><title>\n  My   Page </title></head></html>");
        assert_eq!(page_title(&html).as_deref(), Some("My Page"));
        let untitled = Html::parse_document("<p>no title</p>");
        assert_eq!(page_title(&untitled), None);
    }
}
