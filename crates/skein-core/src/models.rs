use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::CrawlError;

/// Free-form metadata attached to a request and carried to its result.
pub type Meta = Map<String, Value>;

/// Ordered header list. Names are kept as given; lookups are case-insensitive.
pub type Headers = Vec<(String, String)>;

/// HTTP method of a fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(CrawlError::InvalidRequest(format!("Unknown method: {s}"))),
        }
    }
}

/// Normalize a URL into its resource identity.
///
/// Parsing already lower-cases scheme and host, drops default ports, removes
/// dot segments and percent-encodes what must be encoded. The fragment never
/// reaches the server, so it is stripped.
pub fn resource_id(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Parse and normalize a raw URL string into its resource identity.
pub fn normalize_url(raw: &str) -> Result<String, CrawlError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| CrawlError::InvalidRequest(format!("Invalid URL '{raw}': {e}")))?;
    Ok(resource_id(&url))
}

// ---------------------------------------------------------------------------
// FetchRequest
// ---------------------------------------------------------------------------

/// A unit of fetch work: what to fetch and how to handle the result.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: Url,
    body: Option<Vec<u8>>,
    headers: Headers,
    /// Metadata copied through to the result and, by convention, to records.
    pub meta: Meta,
    callback: Option<String>,
    dont_filter: bool,
    /// Reserved. Queues are FIFO and never look at it.
    priority: i32,
}

impl FetchRequest {
    pub fn new(method: Method, url: &str) -> Result<Self, CrawlError> {
        let url = Url::parse(url.trim())
            .map_err(|e| CrawlError::InvalidRequest(format!("Invalid URL '{url}': {e}")))?;
        Ok(Self::from_url(method, url))
    }

    pub fn get(url: &str) -> Result<Self, CrawlError> {
        Self::new(Method::Get, url)
    }

    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            headers: Vec::new(),
            meta: Meta::new(),
            callback: None,
            dont_filter: false,
            priority: 0,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Select the parser that handles this request's result by name.
    pub fn with_callback(mut self, name: impl Into<String>) -> Self {
        self.callback = Some(name.into());
        self
    }

    /// Bypass the dedup filter for this request.
    pub fn dont_filter(mut self) -> Self {
        self.dont_filter = true;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn callback(&self) -> Option<&str> {
        self.callback.as_deref()
    }

    pub fn bypasses_filter(&self) -> bool {
        self.dont_filter
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The dedup key for this request.
    pub fn resource_id(&self) -> String {
        resource_id(&self.url)
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ---------------------------------------------------------------------------
// Body / FetchResult
// ---------------------------------------------------------------------------

/// Response payload that can be read exactly once.
#[derive(Debug, Default)]
pub struct Body {
    bytes: Option<Vec<u8>>,
}

impl Body {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Some(bytes.into()),
        }
    }

    /// Take the payload. Fails with [`CrawlError::BodyConsumed`] on a second call.
    pub fn take(&mut self) -> Result<Vec<u8>, CrawlError> {
        self.bytes.take().ok_or(CrawlError::BodyConsumed)
    }

    pub fn is_consumed(&self) -> bool {
        self.bytes.is_none()
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

/// A fetched payload paired with the request that produced it.
#[derive(Debug)]
pub struct FetchResult {
    status: u16,
    headers: Headers,
    body: Body,
    request: FetchRequest,
}

impl FetchResult {
    pub fn new(request: FetchRequest, status: u16, headers: Headers, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
            request,
        }
    }

    /// A canned `200 OK` result for `url`, without any network activity.
    ///
    /// Useful for injecting pages fetched elsewhere through a source.
    pub fn synthetic(url: &str, content: impl Into<Vec<u8>>) -> Result<Self, CrawlError> {
        let request = FetchRequest::get(url)?;
        Ok(Self::new(request, 200, Vec::new(), Body::new(content)))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup (first match).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    pub fn url(&self) -> &Url {
        self.request.url()
    }

    pub fn meta(&self) -> &Meta {
        &self.request.meta
    }

    /// Read the body bytes. Destructive: the second read fails.
    pub fn bytes(&mut self) -> Result<Vec<u8>, CrawlError> {
        self.body.take()
    }

    /// Read the body as text, replacing invalid UTF-8. Destructive.
    pub fn text(&mut self) -> Result<String, CrawlError> {
        let bytes = self.body.take()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn into_request(self) -> FetchRequest {
        self.request
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One extracted unit of output: an ordered field name to value mapping.
///
/// The core enforces no schema on records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of `field`, or `None` if absent or not a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// Everything that crosses a stage boundary.
#[derive(Debug)]
pub enum WorkItem {
    Request(FetchRequest),
    Response(FetchResult),
    Record(Record),
}

impl WorkItem {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::Request(_) => "request",
            WorkItem::Response(_) => "response",
            WorkItem::Record(_) => "record",
        }
    }
}

impl From<FetchRequest> for WorkItem {
    fn from(request: FetchRequest) -> Self {
        WorkItem::Request(request)
    }
}

impl From<FetchResult> for WorkItem {
    fn from(result: FetchResult) -> Self {
        WorkItem::Response(result)
    }
}

impl From<Record> for WorkItem {
    fn from(record: Record) -> Self {
        WorkItem::Record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_roundtrip() {
        for method in [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
            Method::Options,
        ] {
            let parsed: Method = method.as_str().parse().unwrap();
            assert_eq!(parsed, method);
        }
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn test_resource_id_normalizes() {
        let a = normalize_url("HTTP://Example.COM:80/a/./b/../c#section").unwrap();
        let b = normalize_url("http://example.com/a/c").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "http://example.com/a/c");
    }

    #[test]
    fn test_resource_id_keeps_query() {
        let a = normalize_url("https://example.com/?page=1").unwrap();
        let b = normalize_url("https://example.com/?page=2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let err = FetchRequest::get("not a url").unwrap_err();
        assert!(matches!(err, CrawlError::InvalidRequest(_)));
    }

    #[test]
    fn test_request_builder() {
        let req = FetchRequest::new(Method::Post, "https://example.com/api")
            .unwrap()
            .with_body("q=1")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_meta("depth", 2)
            .with_callback("api")
            .with_priority(5)
            .dont_filter();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.body(), Some(&b"q=1"[..]));
        assert_eq!(req.callback(), Some("api"));
        assert_eq!(req.meta.get("depth"), Some(&Value::from(2)));
        assert_eq!(req.priority(), 5);
        assert!(req.bypasses_filter());
        assert_eq!(req.to_string(), "POST https://example.com/api");
    }

    #[test]
    fn test_body_is_single_consume() {
        let mut result = FetchResult::synthetic("https://example.com", "hello").unwrap();
        assert_eq!(result.text().unwrap(), "hello");
        assert!(matches!(result.text(), Err(CrawlError::BodyConsumed)));
        assert!(matches!(result.bytes(), Err(CrawlError::BodyConsumed)));
    }

    #[test]
    fn test_result_keeps_request() {
        let request = FetchRequest::get("https://example.com/x")
            .unwrap()
            .with_meta("k", "v");
        let result = FetchResult::new(
            request,
            404,
            vec![("Content-Type".into(), "text/html".into())],
            Body::default(),
        );
        assert_eq!(result.url().as_str(), "https://example.com/x");
        assert_eq!(result.meta().get("k"), Some(&Value::from("v")));
        assert_eq!(result.header("content-type"), Some("text/html"));
        assert!(!result.is_success());
    }

    #[test]
    fn test_record_keeps_insertion_order() {
        let record = Record::new().with("z", 1).with("a", 2).with("m", 3);
        let keys: Vec<_> = record.fields().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_record_get_str() {
        let record = Record::new().with("url", "https://example.com").with("n", 1);
        assert_eq!(record.get_str("url"), Some("https://example.com"));
        assert_eq!(record.get_str("n"), None);
        assert_eq!(record.get_str("missing"), None);
    }

    #[test]
    fn test_work_item_conversions() {
        let item: WorkItem = Record::new().into();
        assert_eq!(item.kind(), "record");
        let item: WorkItem = FetchRequest::get("https://example.com").unwrap().into();
        assert_eq!(item.kind(), "request");
    }
}
