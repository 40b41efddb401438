use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::CrawlError;

/// Remembers which resource identities have been seen.
///
/// `seen` marks the identifier and reports whether it was already present
/// *before* the call. Once an identifier is reported as seen it stays seen.
/// A backend that cannot answer must return an error rather than "unseen".
pub trait DedupFilter: Send + Sync + 'static {
    fn seen(&self, identifier: &str) -> impl Future<Output = Result<bool, CrawlError>> + Send;
}

/// Exact in-memory set. Memory grows with the number of distinct identifiers.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    seen: Arc<Mutex<HashSet<String>>>,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous form of [`DedupFilter::seen`].
    pub fn check_and_mark(&self, identifier: &str) -> bool {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !seen.insert(identifier.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DedupFilter for MemoryFilter {
    async fn seen(&self, identifier: &str) -> Result<bool, CrawlError> {
        Ok(self.check_and_mark(identifier))
    }
}

/// No filtering: every identifier is reported unseen and nothing is stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFilter;

impl DedupFilter for NullFilter {
    async fn seen(&self, _identifier: &str) -> Result<bool, CrawlError> {
        Ok(false)
    }
}

impl<D: DedupFilter> DedupFilter for Arc<D> {
    fn seen(&self, identifier: &str) -> impl Future<Output = Result<bool, CrawlError>> + Send {
        (**self).seen(identifier)
    }
}
