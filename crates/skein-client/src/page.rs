//! A ready-made parser for generic HTML pages.

use std::sync::Arc;

use htmd::HtmlToMarkdown;
use scraper::Html;
use serde_json::Value;
use sha2::{Digest, Sha256};
use skein_core::error::CrawlError;
use skein_core::models::{FetchRequest, FetchResult, Method, Record, WorkItem};
use skein_core::traits::Parser;

use crate::links::{discover_links, page_title};

/// Meta key holding a request's distance from its seed.
pub const DEPTH_KEY: &str = "depth";

/// Elements left out of a page's `markdown` unless kept with
/// [`PageParser::keep_tag`].
pub const DEFAULT_SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "svg", "nav", "footer",
];

/// Hex SHA-256 of page content, used to spot unchanged pages.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Turns an HTML page into one page record and follow-up requests for the
/// links it contains.
///
/// The record carries `url`, `status`, `title`, `markdown`, `content_hash`
/// and `depth`, followed by any other request metadata. Links are followed
/// only from successful HTML pages, while the page's depth is below
/// `max_depth`.
#[derive(Clone)]
pub struct PageParser {
    skip_tags: Vec<String>,
    converter: Arc<HtmlToMarkdown>,
    max_depth: Option<u64>,
    same_host: bool,
    follow_callback: Option<String>,
}

impl Default for PageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PageParser {
    pub fn new() -> Self {
        let skip_tags: Vec<String> = DEFAULT_SKIP_TAGS.iter().map(|t| t.to_string()).collect();
        Self {
            converter: converter_for(&skip_tags),
            skip_tags,
            max_depth: None,
            same_host: false,
            follow_callback: None,
        }
    }

    /// Stop following links from pages at this depth. Seeds are depth 0,
    /// so 0 means "never follow".
    pub fn with_max_depth(mut self, depth: u64) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Only follow links that stay on the page's own host.
    pub fn same_host(mut self) -> Self {
        self.same_host = true;
        self
    }

    /// Route follow-up requests to the parser registered under `name`.
    pub fn follow_with(mut self, name: impl Into<String>) -> Self {
        self.follow_callback = Some(name.into());
        self
    }

    /// Leave `tag` and its content out of the `markdown` field.
    pub fn skip_tag(mut self, tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        if !self.skip_tags.contains(&tag) {
            self.skip_tags.push(tag);
            self.converter = converter_for(&self.skip_tags);
        }
        self
    }

    /// Render `tag` in the `markdown` field even if skipped by default.
    pub fn keep_tag(mut self, tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        let before = self.skip_tags.len();
        self.skip_tags.retain(|t| *t != tag);
        if self.skip_tags.len() != before {
            self.converter = converter_for(&self.skip_tags);
        }
        self
    }

    pub fn skipped_tags(&self) -> &[String] {
        &self.skip_tags
    }

    fn markdown(&self, html: &str) -> Result<String, CrawlError> {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .map_err(|e| CrawlError::ParseError(format!("HTML to Markdown failed: {e}")))
    }

    fn follows_from(&self, depth: u64) -> bool {
        self.max_depth.is_none_or(|max| depth < max)
    }

    fn follow_up(&self, url: url::Url, depth: u64, referer: &str) -> FetchRequest {
        let mut request = FetchRequest::from_url(Method::Get, url)
            .with_meta(DEPTH_KEY, depth)
            .with_meta("referer", referer);
        if let Some(name) = &self.follow_callback {
            request = request.with_callback(name.clone());
        }
        request
    }
}

fn converter_for(skip_tags: &[String]) -> Arc<HtmlToMarkdown> {
    let tags: Vec<&str> = skip_tags.iter().map(String::as_str).collect();
    Arc::new(HtmlToMarkdown::builder().skip_tags(tags).build())
}

fn is_html(result: &FetchResult) -> bool {
    result
        .header("content-type")
        .is_none_or(|ct| ct.to_ascii_lowercase().contains("html"))
}

impl Parser for PageParser {
    fn parse(&self, mut result: FetchResult) -> Result<Vec<WorkItem>, CrawlError> {
        let body = result.text()?;
        let url = result.url().clone();
        let depth = result
            .meta()
            .get(DEPTH_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let mut record = Record::new()
            .with("url", url.as_str())
            .with("status", result.status());
        let mut items = Vec::new();

        if is_html(&result) {
            let (title, links) = {
                let document = Html::parse_document(&body);
                let title = page_title(&document);
                let links = if result.is_success() && self.follows_from(depth) {
                    discover_links(&document, &url)
                } else {
                    Vec::new()
                };
                (title, links)
            };
            record.insert("title", title);
            record.insert("markdown", self.markdown(&body)?);

            for link in links {
                if self.same_host && link.host_str() != url.host_str() {
                    continue;
                }
                items.push(WorkItem::Request(self.follow_up(link, depth + 1, url.as_str())));
            }
        } else {
            record.insert("title", Value::Null);
            record.insert("markdown", Value::Null);
        }

        record.insert("content_hash", content_hash(&body));
        record.insert(DEPTH_KEY, depth);
        for (key, value) in result.meta() {
            if record.get(key).is_none() {
                record.insert(key.clone(), value.clone());
            }
        }

        tracing::debug!(url = %url, links = items.len(), "Parsed page");
        items.insert(0, WorkItem::Record(record));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use skein_core::models::Body;

    use super::*;

    const HTML: &str = r#"<html><head><title>Home</title></head><body>
        <h1>Welcome</h1>
        <a href="/about">About</a>
        <a href="https://elsewhere.org/">Elsewhere</a>
    </body></html>"#;

    fn page(url: &str, depth: Option<u64>) -> FetchResult {
        let mut request = FetchRequest::get(url).unwrap();
        if let Some(d) = depth {
            request = request.with_meta(DEPTH_KEY, d);
        }
        FetchResult::new(
            request,
            200,
            vec![("Content-Type".into(), "text/html; charset=utf-8".into())],
            Body::new(HTML),
        )
    }

    fn split(items: Vec<WorkItem>) -> (Vec<Record>, Vec<FetchRequest>) {
        let mut records = Vec::new();
        let mut requests = Vec::new();
        for item in items {
            match item {
                WorkItem::Record(r) => records.push(r),
                WorkItem::Request(r) => requests.push(r),
                WorkItem::Response(_) => panic!("parser yielded a response"),
            }
        }
        (records, requests)
    }

    #[test]
    fn test_page_record_fields() {
        let (records, _) = split(PageParser::new().parse(page("https://example.com/", None)).unwrap());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get_str("url"), Some("https://example.com/"));
        assert_eq!(record.get_str("title"), Some("Home"));
        assert!(record.get_str("markdown").unwrap().contains("Welcome"));
        assert_eq!(record.get_str("content_hash").unwrap().len(), 64);
        assert_eq!(record.get("depth"), Some(&Value::from(0)));
    }

    #[test]
    fn test_follow_ups_carry_depth() {
        let (_, requests) = split(PageParser::new().parse(page("https://example.com/", Some(1))).unwrap());
        let urls: Vec<&str> = requests.iter().map(|r| r.url().as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/about", "https://elsewhere.org/"]);
        assert!(requests.iter().all(|r| r.meta.get(DEPTH_KEY) == Some(&Value::from(2))));
        assert_eq!(
            requests[0].meta.get("referer"),
            Some(&Value::from("https://example.com/"))
        );
    }

    #[test]
    fn test_same_host_filter() {
        let parser = PageParser::new().same_host();
        let (_, requests) = split(parser.parse(page("https://example.com/", None)).unwrap());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url().host_str(), Some("example.com"));
    }

    #[test]
    fn test_max_depth_stops_following() {
        let parser = PageParser::new().with_max_depth(1);
        let (_, at_seed) = split(parser.parse(page("https://example.com/", Some(0))).unwrap());
        assert_eq!(at_seed.len(), 2);
        let (records, at_limit) = split(parser.parse(page("https://example.com/", Some(1))).unwrap());
        assert!(at_limit.is_empty());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_follow_callback() {
        let parser = PageParser::new().follow_with("detail");
        let (_, requests) = split(parser.parse(page("https://example.com/", None)).unwrap());
        assert!(requests.iter().all(|r| r.callback() == Some("detail")));
    }

    #[test]
    fn test_non_html_is_recorded_without_links() {
        let request = FetchRequest::get("https://example.com/data.json").unwrap();
        let result = FetchResult::new(
            request,
            200,
            vec![("content-type".into(), "application/json".into())],
            Body::new(r#"{"a": "<a href='/x'>x</a>"}"#),
        );
        let (records, requests) = split(PageParser::new().parse(result).unwrap());
        assert!(requests.is_empty());
        assert_eq!(records[0].get("markdown"), Some(&Value::Null));
    }

    fn html_page(body: &str) -> FetchResult {
        FetchResult::new(
            FetchRequest::get("https://example.com/").unwrap(),
            200,
            vec![("Content-Type".into(), "text/html".into())],
            Body::new(body),
        )
    }

    fn markdown_of(parser: &PageParser, body: &str) -> String {
        let (records, _) = split(parser.parse(html_page(body)).unwrap());
        records[0].get_str("markdown").unwrap().to_string()
    }

    #[test]
    fn test_markdown_drops_skipped_tags() {
        let body = "<nav>Menu</nav><h2>Story</h2><p>Body text</p><script>track()</script>";
        let md = markdown_of(&PageParser::new(), body);
        assert!(md.contains("Story"));
        assert!(md.contains("Body text"));
        assert!(!md.contains("Menu"));
        assert!(!md.contains("track"));
        assert_eq!(md, md.trim());
    }

    #[test]
    fn test_skip_list_is_configurable() {
        let body = "<nav>Menu</nav><aside>Ad</aside><p>Body</p>";
        let parser = PageParser::new().keep_tag("NAV").skip_tag("aside");
        let md = markdown_of(&parser, body);
        assert!(md.contains("Menu"));
        assert!(!md.contains("Ad"));
        assert!(md.contains("Body"));
        assert!(parser.skipped_tags().iter().any(|t| t == "aside"));
        assert!(!parser.skipped_tags().iter().any(|t| t == "nav"));

        // The default parser is unaffected by another parser's settings.
        let default_md = markdown_of(&PageParser::new(), body);
        assert!(!default_md.contains("Menu"));
        assert!(default_md.contains("Ad"));
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("world"));
    }
}
