//! Test utilities: handwritten mocks for the stage contracts.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so tests can assert
//! on recorded calls after handing a clone to the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::CrawlError;
use crate::models::{Body, FetchRequest, FetchResult, Record, WorkItem};
use crate::traits::{Fetcher, ParserRef, ProcessorRef, parser, processor};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Canned {
    Page { status: u16, body: String },
    Fail(String),
}

/// Fetcher serving canned pages keyed by URL.
///
/// Unknown URLs fail with an `HttpError` mentioning 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, Canned>>>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 for `url`.
    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.with_status(url, 200, body)
    }

    pub fn with_status(self, url: &str, status: u16, body: &str) -> Self {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            Canned::Page {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// Fail every fetch of `url` with a network error.
    pub fn with_failure(self, url: &str, message: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Canned::Fail(message.to_string()));
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of fetches observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResult, CrawlError> {
        let url = request.url().to_string();
        self.calls.lock().unwrap().push(url.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let canned = self.pages.lock().unwrap().get(&url).cloned();
        match canned {
            Some(Canned::Page { status, body }) => Ok(FetchResult::new(
                request,
                status,
                vec![("Content-Type".into(), "text/html".into())],
                Body::from(body),
            )),
            Some(Canned::Fail(message)) => Err(CrawlError::NetworkError(message)),
            None => Err(CrawlError::HttpError(format!("HTTP 404 for {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Parser that turns any result into one record `{"url": <url>}`.
pub fn url_parser() -> ParserRef {
    parser(|result: FetchResult| {
        let record = Record::new().with("url", result.url().as_str());
        Ok(vec![WorkItem::Record(record)])
    })
}

/// Parser that yields a fixed list of follow-up URLs plus a record.
pub fn linking_parser(links: HashMap<String, Vec<String>>) -> ParserRef {
    parser(move |result: FetchResult| {
        let url = result.url().to_string();
        let mut items = vec![WorkItem::Record(Record::new().with("url", url.as_str()))];
        for link in links.get(&url).into_iter().flatten() {
            items.push(WorkItem::Request(FetchRequest::get(link)?));
        }
        Ok(items)
    })
}

// ---------------------------------------------------------------------------
// Processors
// ---------------------------------------------------------------------------

/// Records the order in which named processor steps ran.
#[derive(Clone, Default)]
pub struct RecordingProcessor {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A step that logs its name and succeeds.
    pub fn step(&self, name: &str) -> ProcessorRef {
        self.step_with(name, || Ok(()))
    }

    /// A step that logs its name and returns whatever `outcome` returns.
    pub fn step_with<F>(&self, name: &str, outcome: F) -> ProcessorRef
    where
        F: Fn() -> Result<(), CrawlError> + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let name = name.to_string();
        processor(move |_record: &mut Record| {
            calls.lock().unwrap().push(name.clone());
            outcome()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Processor that always fails with a `ProcessorError` naming itself.
pub fn failing_processor(name: &str) -> ProcessorRef {
    let name = name.to_string();
    processor(move |_record: &mut Record| {
        Err(CrawlError::ProcessorError(format!("{name} failed")))
    })
}
