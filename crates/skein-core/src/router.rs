//! Typed work queues and the classify-and-enqueue step between stages.
//!
//! The router is the single place where fetch requests meet the dedup
//! filter. Every work item produced anywhere in the engine passes through
//! [`Router::route`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::CrawlError;
use crate::filter::DedupFilter;
use crate::models::{FetchRequest, FetchResult, Record, WorkItem};

/// Receiving end of the engine's error stream.
pub type ErrorStream = mpsc::UnboundedReceiver<CrawlError>;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

struct Envelope<T> {
    item: T,
    ack: Option<oneshot::Sender<()>>,
}

/// Multi-producer multi-consumer FIFO.
///
/// A capacity of 0 is a rendezvous: `push` returns only once a consumer has
/// taken the item.
pub struct Queue<T> {
    tx: mpsc::Sender<Envelope<T>>,
    rx: Mutex<mpsc::Receiver<Envelope<T>>>,
    capacity: usize,
}

impl<T: Send> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items waiting to be taken.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue, waiting for room (or for a taker when the capacity is 0).
    ///
    /// Returns false only if the item never entered the queue. A rendezvous
    /// push cancelled while waiting for its taker still returns true: the
    /// item is buffered and belongs to whoever pops it.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> bool {
        let (ack, taken) = if self.capacity == 0 {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            res = self.tx.send(Envelope { item, ack }) => res.is_ok(),
        };
        if !sent {
            return false;
        }

        if let Some(taken) = taken {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                _ = taken => {}
            }
        }
        true
    }

    /// Dequeue the oldest item. Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        let envelope = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            envelope = async { self.rx.lock().await.recv().await } => envelope,
        }?;
        if let Some(ack) = envelope.ack {
            let _ = ack.send(());
        }
        Some(envelope.item)
    }
}

// ---------------------------------------------------------------------------
// In-flight tracking
// ---------------------------------------------------------------------------

/// Counts routed items that have not been fully processed yet.
///
/// An item is counted from just before it is enqueued until its handler has
/// routed everything it produced, so the count only reaches zero when no
/// more work can appear (other than from the source).
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    source_done: AtomicBool,
    notify: Notify,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark one dequeued item as fully handled.
    pub fn done(&self) {
        let prev = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
            .unwrap_or(0);
        if prev <= 1 {
            self.notify.notify_waiters();
        }
    }

    /// The source has ended; no new seed work will arrive.
    pub fn source_finished(&self) {
        self.source_done.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.source_done.load(Ordering::SeqCst) && self.count() == 0
    }

    /// Wait until drained or cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_drained() || cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                () = &mut notified => {}
                () = cancel.cancelled() => return,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Capacities of the three queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapacities {
    pub requests: usize,
    pub results: usize,
    pub records: usize,
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            requests: 100,
            results: 100,
            records: 100,
        }
    }
}

/// Number of items waiting in each queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueLengths {
    pub requests: usize,
    pub results: usize,
    pub records: usize,
}

impl QueueLengths {
    pub fn is_empty(&self) -> bool {
        self.requests == 0 && self.results == 0 && self.records == 0
    }
}

/// Holds the request, result and record queues and routes work into them.
pub struct Router<D> {
    requests: Queue<FetchRequest>,
    results: Queue<FetchResult>,
    records: Queue<Record>,
    filter: D,
    errors: mpsc::UnboundedSender<CrawlError>,
    in_flight: InFlight,
    cancel: CancellationToken,
}

impl<D: DedupFilter> Router<D> {
    /// Create a router and the error stream it reports to.
    pub fn new(
        filter: D,
        capacities: QueueCapacities,
        cancel: CancellationToken,
    ) -> (Self, ErrorStream) {
        let (errors, stream) = mpsc::unbounded_channel();
        let router = Self {
            requests: Queue::new(capacities.requests),
            results: Queue::new(capacities.results),
            records: Queue::new(capacities.records),
            filter,
            errors,
            in_flight: InFlight::new(),
            cancel,
        };
        (router, stream)
    }

    /// Classify `item` and enqueue it.
    ///
    /// Requests are checked against the dedup filter unless they bypass it.
    /// A duplicate is reported as [`CrawlError::DuplicateRequest`] and not
    /// enqueued; a filter failure is reported and the request skipped.
    /// Returns whether the item was enqueued.
    pub async fn route(&self, item: WorkItem) -> bool {
        match item {
            WorkItem::Request(request) => {
                if !request.bypasses_filter() {
                    let id = request.resource_id();
                    match self.filter.seen(&id).await {
                        Ok(false) => {}
                        Ok(true) => {
                            tracing::debug!(url = %id, "Duplicate request suppressed");
                            self.report(CrawlError::DuplicateRequest(id));
                            return false;
                        }
                        Err(e) => {
                            tracing::warn!(url = %id, error = %e, "Dedup filter failed");
                            self.report(e);
                            return false;
                        }
                    }
                }
                self.enqueue(&self.requests, request).await
            }
            WorkItem::Response(result) => self.enqueue(&self.results, result).await,
            WorkItem::Record(record) => self.enqueue(&self.records, record).await,
        }
    }

    async fn enqueue<T: Send>(&self, queue: &Queue<T>, item: T) -> bool {
        self.in_flight.add();
        let pushed = queue.push(item, &self.cancel).await;
        if !pushed {
            self.in_flight.done();
        }
        pushed
    }

    pub async fn next_request(&self) -> Option<FetchRequest> {
        self.requests.pop(&self.cancel).await
    }

    pub async fn next_result(&self) -> Option<FetchResult> {
        self.results.pop(&self.cancel).await
    }

    pub async fn next_record(&self) -> Option<Record> {
        self.records.pop(&self.cancel).await
    }

    /// Push an error onto the error stream.
    pub fn report(&self, error: CrawlError) {
        // Nobody listening is not a failure of the crawl.
        let _ = self.errors.send(error);
    }

    /// True if all three queues are empty at this instant.
    pub fn idle(&self) -> bool {
        self.queue_lengths().is_empty()
    }

    pub fn queue_lengths(&self) -> QueueLengths {
        QueueLengths {
            requests: self.requests.len(),
            results: self.results.len(),
            records: self.records.len(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
