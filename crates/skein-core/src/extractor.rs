//! Callback-name dispatch from fetched results to parsers.

use std::collections::HashMap;
use std::fmt;

use crate::error::CrawlError;
use crate::models::{FetchResult, Record, WorkItem};
use crate::traits::{ParserRef, parser};

/// Registry name that selects the fallback parser.
pub const DEFAULT_CALLBACK: &str = "default";

/// Registry of named parsers.
///
/// A result is handled by the parser named in its request's callback. With no
/// callback, the parser named `"default"` is used, or the only parser when
/// exactly one is registered. A registry holding nothing but `"default"`
/// handles every result regardless of callback.
pub struct Extractor {
    parsers: HashMap<String, ParserRef>,
    default: Option<ParserRef>,
    catch_all: bool,
}

impl Extractor {
    /// Build a registry. Fails on an empty map or a blank name.
    pub fn new(parsers: HashMap<String, ParserRef>) -> Result<Self, CrawlError> {
        if parsers.is_empty() {
            return Err(CrawlError::ConfigError(
                "Extractor needs at least one parser".into(),
            ));
        }
        if let Some(name) = parsers.keys().find(|name| name.trim().is_empty()) {
            return Err(CrawlError::ConfigError(format!(
                "Parser name must not be blank: {name:?}"
            )));
        }

        let default = match parsers.get(DEFAULT_CALLBACK) {
            Some(p) => Some(p.clone()),
            None if parsers.len() == 1 => parsers.values().next().cloned(),
            None => None,
        };
        let catch_all = parsers.len() == 1 && parsers.contains_key(DEFAULT_CALLBACK);

        Ok(Self {
            parsers,
            default,
            catch_all,
        })
    }

    /// Registry holding one parser under `"default"`.
    pub fn single(p: ParserRef) -> Self {
        Self {
            parsers: HashMap::from([(DEFAULT_CALLBACK.to_string(), p.clone())]),
            default: Some(p),
            catch_all: true,
        }
    }

    /// Start an empty builder.
    pub fn builder() -> ExtractorBuilder {
        ExtractorBuilder::default()
    }

    /// Pick the parser for a request callback.
    pub fn resolve(&self, callback: Option<&str>) -> Result<ParserRef, CrawlError> {
        if self.catch_all {
            if let Some(p) = &self.default {
                return Ok(p.clone());
            }
        }
        match callback {
            Some(name) if name.trim().is_empty() => {
                Err(CrawlError::InvalidCallback(name.to_string()))
            }
            Some(name) => self
                .parsers
                .get(name)
                .cloned()
                .ok_or_else(|| CrawlError::CallbackNotFound(name.to_string())),
            None => self.default.clone().ok_or(CrawlError::NoDefaultParser),
        }
    }

    /// Run the parser selected by `result`'s callback.
    ///
    /// Synchronous: the engine calls this from the blocking pool.
    pub fn extract(&self, result: FetchResult) -> Result<Vec<WorkItem>, CrawlError> {
        let p = self.resolve(result.request().callback())?;
        p.parse(result)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("parsers", &self.names())
            .field("has_default", &self.has_default())
            .finish()
    }
}

/// Incremental construction of an [`Extractor`].
#[derive(Default)]
pub struct ExtractorBuilder {
    parsers: HashMap<String, ParserRef>,
}

impl ExtractorBuilder {
    pub fn register(mut self, name: impl Into<String>, p: ParserRef) -> Self {
        self.parsers.insert(name.into(), p);
        self
    }

    pub fn build(self) -> Result<Extractor, CrawlError> {
        Extractor::new(self.parsers)
    }
}

/// Built-in parser: one record with the url, status and body text, followed
/// by the request metadata.
pub fn body_reader() -> ParserRef {
    parser(|mut result: FetchResult| {
        let body = result.text()?;
        let mut record = Record::new()
            .with("url", result.url().as_str())
            .with("status", result.status())
            .with("body", body);
        for (key, value) in result.meta() {
            if record.get(key).is_none() {
                record.insert(key.clone(), value.clone());
            }
        }
        Ok(vec![WorkItem::Record(record)])
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::models::FetchRequest;

    fn tagging(tag: &'static str) -> ParserRef {
        parser(move |_result: FetchResult| Ok(vec![WorkItem::Record(Record::new().with("by", tag))]))
    }

    fn result_with_callback(callback: Option<&str>) -> FetchResult {
        let mut request = FetchRequest::get("https://example.com/").unwrap();
        if let Some(name) = callback {
            request = request.with_callback(name);
        }
        FetchResult::new(request, 200, Vec::new(), "ok".to_string().into())
    }

    fn tag_of(items: Vec<WorkItem>) -> String {
        match items.into_iter().next() {
            Some(WorkItem::Record(record)) => record.get_str("by").unwrap().to_string(),
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn test_only_default_handles_any_callback() {
        let f = tagging("f");
        let extractor = Extractor::builder()
            .register("default", f.clone())
            .build()
            .unwrap();

        for callback in [None, Some("a"), Some("anything"), Some("")] {
            let resolved = extractor.resolve(callback).unwrap();
            assert!(Arc::ptr_eq(&resolved, &f));
        }
        let items = extractor.extract(result_with_callback(Some("zzz"))).unwrap();
        assert_eq!(tag_of(items), "f");
    }

    #[test]
    fn test_ambiguous_default_fails() {
        let extractor = Extractor::builder()
            .register("a", tagging("f"))
            .register("b", tagging("g"))
            .build()
            .unwrap();
        assert!(!extractor.has_default());
        assert!(matches!(
            extractor.resolve(None),
            Err(CrawlError::NoDefaultParser)
        ));
    }

    #[test]
    fn test_named_callback_resolves() {
        let f = tagging("f");
        let extractor = Extractor::builder()
            .register("a", f.clone())
            .register("b", tagging("g"))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(&extractor.resolve(Some("a")).unwrap(), &f));
        let items = extractor.extract(result_with_callback(Some("b"))).unwrap();
        assert_eq!(tag_of(items), "g");
    }

    #[test]
    fn test_missing_and_invalid_callbacks_are_distinct() {
        let extractor = Extractor::builder()
            .register("a", tagging("f"))
            .register("b", tagging("g"))
            .build()
            .unwrap();

        let Err(missing) = extractor.resolve(Some("c")) else {
            panic!("unknown callback resolved");
        };
        assert!(matches!(missing, CrawlError::CallbackNotFound(ref name) if name == "c"));

        let Err(invalid) = extractor.resolve(Some("  ")) else {
            panic!("blank callback resolved");
        };
        assert!(matches!(invalid, CrawlError::InvalidCallback(_)));
    }

    #[test]
    fn test_sole_parser_is_default() {
        let extractor = Extractor::builder()
            .register("page", tagging("page"))
            .build()
            .unwrap();
        assert!(extractor.has_default());
        assert_eq!(tag_of(extractor.extract(result_with_callback(None)).unwrap()), "page");
        // A sole non-default parser does not swallow unknown callbacks.
        assert!(matches!(
            extractor.resolve(Some("other")),
            Err(CrawlError::CallbackNotFound(_))
        ));
    }

    #[test]
    fn test_explicit_default_among_many() {
        let extractor = Extractor::builder()
            .register("default", tagging("d"))
            .register("detail", tagging("x"))
            .build()
            .unwrap();
        assert_eq!(tag_of(extractor.extract(result_with_callback(None)).unwrap()), "d");
        assert_eq!(
            tag_of(extractor.extract(result_with_callback(Some("detail"))).unwrap()),
            "x"
        );
        assert!(matches!(
            extractor.resolve(Some("nope")),
            Err(CrawlError::CallbackNotFound(_))
        ));
    }

    #[test]
    fn test_construction_rejects_bad_registries() {
        assert!(matches!(
            Extractor::new(HashMap::new()),
            Err(CrawlError::ConfigError(_))
        ));
        assert!(matches!(
            Extractor::builder().register(" ", tagging("f")).build(),
            Err(CrawlError::ConfigError(_))
        ));
    }

    #[test]
    fn test_body_reader_copies_meta() {
        let request = FetchRequest::get("https://example.com/item")
            .unwrap()
            .with_meta("category", "books")
            .with_meta("url", "ignored");
        let result = FetchResult::new(request, 200, Vec::new(), "hello".to_string().into());

        let items = body_reader().parse(result).unwrap();
        assert_eq!(items.len(), 1);
        let WorkItem::Record(record) = &items[0] else {
            panic!("expected a record");
        };
        assert_eq!(record.get_str("url"), Some("https://example.com/item"));
        assert_eq!(record.get("status"), Some(&Value::from(200)));
        assert_eq!(record.get_str("body"), Some("hello"));
        assert_eq!(record.get_str("category"), Some("books"));
    }

    #[test]
    fn test_parser_errors_propagate() {
        let failing = parser(|_result: FetchResult| Err(CrawlError::ParseError("bad html".into())));
        let extractor = Extractor::single(failing);
        assert!(matches!(
            extractor.extract(result_with_callback(None)),
            Err(CrawlError::ParseError(_))
        ));
    }
}
