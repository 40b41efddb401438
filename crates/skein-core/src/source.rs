//! Ready-made [`Source`] implementations.
//!
//! [`Generator`] is the usual way to feed a crawl: hand out
//! [`GeneratorHandle`]s to whatever produces seeds and give the generator to
//! the engine. The crawl's generation phase ends once every handle has been
//! closed or dropped.

use tokio::sync::mpsc;

use crate::error::CrawlError;
use crate::models::{FetchRequest, FetchResult, Record, WorkItem};
use crate::traits::Source;

/// Channel-backed source with cloneable producer handles.
#[derive(Debug)]
pub struct Generator {
    rx: mpsc::UnboundedReceiver<WorkItem>,
}

impl Generator {
    /// Create a generator and its first producer handle.
    pub fn new() -> (GeneratorHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (GeneratorHandle { tx }, Self { rx })
    }

    /// A generator pre-loaded with GET requests for `urls`, already closed.
    pub fn from_urls<I, S>(urls: I) -> Result<Self, CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (handle, generator) = Self::new();
        handle.send_urls(urls)?;
        handle.close();
        Ok(generator)
    }
}

impl Source for Generator {
    async fn next(&mut self) -> Option<WorkItem> {
        self.rx.recv().await
    }
}

/// Producer side of a [`Generator`]. Sends never block.
#[derive(Debug, Clone)]
pub struct GeneratorHandle {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl GeneratorHandle {
    pub fn send(&self, item: impl Into<WorkItem>) -> Result<(), CrawlError> {
        self.tx
            .send(item.into())
            .map_err(|_| CrawlError::Generic("Generator is no longer consumed".into()))
    }

    pub fn send_request(&self, request: FetchRequest) -> Result<(), CrawlError> {
        self.send(request)
    }

    /// Queue a GET request for `url`.
    pub fn send_url(&self, url: &str) -> Result<(), CrawlError> {
        self.send(FetchRequest::get(url)?)
    }

    /// Queue GET requests for every URL. Stops at the first invalid URL.
    pub fn send_urls<I, S>(&self, urls: I) -> Result<(), CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            self.send_url(url.as_ref())?;
        }
        Ok(())
    }

    /// Inject an already fetched result, skipping the fetch stage.
    pub fn send_result(&self, result: FetchResult) -> Result<(), CrawlError> {
        self.send(result)
    }

    /// Inject a canned `200 OK` page for `url`.
    pub fn send_synthetic(&self, url: &str, content: impl Into<Vec<u8>>) -> Result<(), CrawlError> {
        self.send(FetchResult::synthetic(url, content)?)
    }

    /// Inject a record straight into the sink stage.
    pub fn send_record(&self, record: Record) -> Result<(), CrawlError> {
        self.send(record)
    }

    /// Forward everything from `input` until it ends.
    pub async fn relay(&self, mut input: mpsc::Receiver<WorkItem>) -> Result<(), CrawlError> {
        while let Some(item) = input.recv().await {
            self.send(item)?;
        }
        Ok(())
    }

    /// Give up this handle. The generator ends when all handles are closed.
    pub fn close(self) {}

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Source over any iterator of work items.
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = WorkItem> + Send + 'static,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I> Source for IterSource<I>
where
    I: Iterator<Item = WorkItem> + Send + 'static,
{
    async fn next(&mut self) -> Option<WorkItem> {
        self.iter.next()
    }
}

impl Source for mpsc::Receiver<WorkItem> {
    async fn next(&mut self) -> Option<WorkItem> {
        self.recv().await
    }
}

impl Source for mpsc::UnboundedReceiver<WorkItem> {
    async fn next(&mut self) -> Option<WorkItem> {
        self.recv().await
    }
}
