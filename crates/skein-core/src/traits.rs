use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::CrawlError;
use crate::models::{FetchRequest, FetchResult, Record, WorkItem};

/// Produces the work that seeds a crawl.
///
/// Returning `None` ends the generation phase normally. The engine only
/// consumes a source; closing it is up to whoever produces into it.
pub trait Source: Send + 'static {
    fn next(&mut self) -> impl Future<Output = Option<WorkItem>> + Send;
}

/// Performs the network operation for one request.
///
/// Implementations do not consult the dedup filter: the router is the only
/// place duplicates are suppressed.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<FetchResult, CrawlError>> + Send;
}

/// Turns one fetched result into records and follow-up requests.
///
/// Parsers run on the blocking pool, so CPU-heavy HTML work is fine here.
/// Implemented for any `Fn(FetchResult) -> Result<Vec<WorkItem>, CrawlError>`.
pub trait Parser: Send + Sync {
    fn parse(&self, result: FetchResult) -> Result<Vec<WorkItem>, CrawlError>;
}

impl<F> Parser for F
where
    F: Fn(FetchResult) -> Result<Vec<WorkItem>, CrawlError> + Send + Sync,
{
    fn parse(&self, result: FetchResult) -> Result<Vec<WorkItem>, CrawlError> {
        self(result)
    }
}

/// Shared handle to a parser, as stored in the extractor registry.
pub type ParserRef = Arc<dyn Parser>;

/// Wrap a closure as a [`ParserRef`].
pub fn parser<F>(f: F) -> ParserRef
where
    F: Fn(FetchResult) -> Result<Vec<WorkItem>, CrawlError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One link of the sink chain.
///
/// Returning [`CrawlError::DropRecord`] stops the chain for this record.
/// Any other error is collected and the chain continues.
/// Implemented for any `Fn(&mut Record) -> Result<(), CrawlError>`.
pub trait Processor: Send + Sync {
    fn process<'a>(&'a self, record: &'a mut Record) -> BoxFuture<'a, Result<(), CrawlError>>;
}

impl<F> Processor for F
where
    F: Fn(&mut Record) -> Result<(), CrawlError> + Send + Sync,
{
    fn process<'a>(&'a self, record: &'a mut Record) -> BoxFuture<'a, Result<(), CrawlError>> {
        Box::pin(std::future::ready(self(record)))
    }
}

/// Shared handle to a processor, as stored in the sink chain.
pub type ProcessorRef = Arc<dyn Processor>;

/// Wrap a closure as a [`ProcessorRef`].
pub fn processor<F>(f: F) -> ProcessorRef
where
    F: Fn(&mut Record) -> Result<(), CrawlError> + Send + Sync + 'static,
{
    Arc::new(f)
}
