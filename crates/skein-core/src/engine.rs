//! The crawl engine: wires source, router, fetch workers, extraction and
//! sink fan-out together and exposes one error stream.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EngineConfig;
use crate::counters::{Counters, StageKind, StageSummary};
use crate::error::CrawlError;
use crate::extractor::Extractor;
use crate::filter::DedupFilter;
use crate::models::{FetchRequest, FetchResult, Record, WorkItem};
use crate::pipeline::Pipeline;
use crate::router::{ErrorStream, InFlight, QueueLengths, Router};
use crate::sequence::SerialRegistry;
use crate::traits::{Fetcher, Source};

/// Call accounting for the four stages of one engine.
#[derive(Debug)]
pub struct StageCounters {
    pub source: Counters,
    pub fetcher: Counters,
    pub extractor: Counters,
    pub pipeline: Counters,
}

impl StageCounters {
    fn new(registry: &SerialRegistry) -> Self {
        Self {
            source: Counters::new(StageKind::Source, registry),
            fetcher: Counters::new(StageKind::Fetcher, registry),
            extractor: Counters::new(StageKind::Extractor, registry),
            pipeline: Counters::new(StageKind::Pipeline, registry),
        }
    }

    pub fn summaries(&self) -> Vec<StageSummary> {
        [&self.source, &self.fetcher, &self.extractor, &self.pipeline]
            .into_iter()
            .map(Counters::summary)
            .collect()
    }
}

/// Read-only snapshot of a running (or finished) engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSummary {
    pub stages: Vec<StageSummary>,
    pub queues: QueueLengths,
    pub in_flight: usize,
    pub running: bool,
    pub drained: bool,
}

impl fmt::Display for EngineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stage in &self.stages {
            let c = &stage.counters;
            writeln!(
                f,
                "{:<4} {:<10} calls={} in_flight={} done={} failed={}",
                stage.id.as_str(),
                stage.kind.as_str(),
                c.call_count,
                c.in_flight_count,
                c.done_count,
                c.fail_count
            )?;
        }
        write!(
            f,
            "queues: requests={} results={} records={} | in_flight={} drained={}",
            self.queues.requests, self.queues.results, self.queues.records, self.in_flight, self.drained
        )
    }
}

/// A configured engine, ready to [`run`](Engine::run).
pub struct Engine<F, D> {
    fetcher: F,
    extractor: Arc<Extractor>,
    pipeline: Pipeline,
    filter: D,
    config: EngineConfig,
    counters: Arc<StageCounters>,
}

impl<F: Fetcher, D: DedupFilter> Engine<F, D> {
    /// Assemble an engine. Stage identifiers are drawn from `registry`.
    ///
    /// Pass [`NullFilter`](crate::filter::NullFilter) to crawl without
    /// deduplication.
    pub fn new(
        fetcher: F,
        extractor: Extractor,
        pipeline: Pipeline,
        filter: D,
        config: EngineConfig,
        registry: &SerialRegistry,
    ) -> Result<Self, CrawlError> {
        config.validate()?;
        Ok(Self {
            fetcher,
            extractor: Arc::new(extractor),
            pipeline,
            filter,
            config,
            counters: Arc::new(StageCounters::new(registry)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }

    /// Start every stage and begin pulling `source`.
    ///
    /// Must be called from within a Tokio runtime. The returned error stream
    /// closes once the handle has been shut down.
    pub fn run<S: Source>(self, source: S) -> (EngineHandle, ErrorStream) {
        let cancel = CancellationToken::new();
        let (router, errors) = Router::new(
            self.filter,
            self.config.queue_capacities(),
            cancel.clone(),
        );
        let shared = Arc::new(Shared {
            router,
            fetcher: self.fetcher,
            extractor: self.extractor,
            pipeline: self.pipeline,
            counters: Arc::clone(&self.counters),
        });
        let tracker = TaskTracker::new();

        if self.config.workers == 0 {
            tracker.spawn(fetch_per_request(Arc::clone(&shared), tracker.clone()));
        } else {
            for worker in 0..self.config.workers {
                tracker.spawn(fetch_worker(Arc::clone(&shared), worker));
            }
        }
        let extract_limit = self.config.extract_workers.map(|n| Arc::new(Semaphore::new(n)));
        tracker.spawn(dispatch_results(
            Arc::clone(&shared),
            tracker.clone(),
            extract_limit,
        ));
        let sink_limit = self.config.sink_workers.map(|n| Arc::new(Semaphore::new(n)));
        tracker.spawn(dispatch_records(
            Arc::clone(&shared),
            tracker.clone(),
            sink_limit,
        ));
        tracker.spawn(pump(Arc::clone(&shared), source));

        tracing::info!(
            workers = self.config.workers,
            extract_workers = ?self.config.extract_workers,
            sink_workers = ?self.config.sink_workers,
            "Engine started"
        );

        let status: Weak<dyn RouterStatus> = Arc::downgrade(&shared) as Weak<dyn RouterStatus>;
        let handle = EngineHandle {
            cancel,
            tracker,
            counters: self.counters,
            status,
        };
        (handle, errors)
    }
}

// ---------------------------------------------------------------------------
// Running state
// ---------------------------------------------------------------------------

struct Shared<F, D> {
    router: Router<D>,
    fetcher: F,
    extractor: Arc<Extractor>,
    pipeline: Pipeline,
    counters: Arc<StageCounters>,
}

impl<F: Fetcher, D: DedupFilter> Shared<F, D> {
    async fn fetch_one(&self, request: FetchRequest) {
        let url = request.url().to_string();
        let call = self.counters.fetcher.begin();
        let outcome = tokio::select! {
            biased;
            () = self.router.cancellation_token().cancelled() => {
                call.fail();
                return;
            }
            outcome = self.fetcher.fetch(request) => outcome,
        };
        match outcome {
            Ok(result) => {
                call.done();
                tracing::debug!(%url, status = result.status(), "Fetched");
                self.router.route(WorkItem::Response(result)).await;
            }
            Err(e) => {
                call.fail();
                tracing::warn!(%url, error = %e, "Fetch failed");
                self.router.report(e);
            }
        }
    }

    /// Run the parser, then route what it yielded.
    ///
    /// `permit` is the extraction pool slot. It is released as soon as the
    /// parser returns: routing may wait on a full queue, and a slot held
    /// there would stall the dispatcher that feeds the fetch workers.
    async fn extract_one(&self, result: FetchResult, permit: Option<OwnedSemaphorePermit>) {
        let url = result.url().to_string();
        let call = self.counters.extractor.begin();
        let extractor = Arc::clone(&self.extractor);
        let outcome = match tokio::task::spawn_blocking(move || extractor.extract(result)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(CrawlError::Generic(format!("Parser task failed: {e}"))),
        };
        drop(permit);

        let items = match outcome {
            Ok(items) => {
                call.done();
                items
            }
            Err(e) => {
                call.fail();
                tracing::warn!(%url, error = %e, "Extraction failed");
                self.router.report(e);
                return;
            }
        };

        tracing::debug!(%url, items = items.len(), "Extracted");
        for item in items {
            match item {
                WorkItem::Response(misplaced) => {
                    tracing::warn!(%url, "Extractor yielded a fetch result");
                    self.router
                        .report(CrawlError::ResultFromExtractor(misplaced.url().to_string()));
                }
                other => {
                    self.router.route(other).await;
                }
            }
        }
    }

    async fn sink_one(&self, mut record: Record) {
        let call = self.counters.pipeline.begin();
        let errors = self.pipeline.send(&mut record).await;
        call.finish(errors.iter().all(CrawlError::is_drop));

        for e in errors {
            if e.is_drop() {
                tracing::debug!("Record dropped by pipeline");
            } else {
                tracing::warn!(error = %e, "Pipeline error");
                self.router.report(e);
            }
        }
    }
}

/// Type-erased view of the running router for the handle.
trait RouterStatus: Send + Sync {
    fn queue_lengths(&self) -> QueueLengths;
    fn in_flight(&self) -> &InFlight;
}

impl<F: Fetcher, D: DedupFilter> RouterStatus for Shared<F, D> {
    fn queue_lengths(&self) -> QueueLengths {
        self.router.queue_lengths()
    }

    fn in_flight(&self) -> &InFlight {
        self.router.in_flight()
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn fetch_worker<F: Fetcher, D: DedupFilter>(shared: Arc<Shared<F, D>>, worker: usize) {
    tracing::debug!(worker, "Fetch worker started");
    while let Some(request) = shared.router.next_request().await {
        shared.fetch_one(request).await;
        shared.router.in_flight().done();
    }
    tracing::debug!(worker, "Fetch worker stopped");
}

async fn fetch_per_request<F: Fetcher, D: DedupFilter>(
    shared: Arc<Shared<F, D>>,
    tracker: TaskTracker,
) {
    while let Some(request) = shared.router.next_request().await {
        let shared = Arc::clone(&shared);
        tracker.spawn(async move {
            shared.fetch_one(request).await;
            shared.router.in_flight().done();
        });
    }
}

/// Wait for a pool slot. The outer `None` means cancelled; an inner `None`
/// means the pool is unbounded.
async fn acquire(
    limit: &Option<Arc<Semaphore>>,
    cancel: &CancellationToken,
) -> Option<Option<OwnedSemaphorePermit>> {
    let Some(semaphore) = limit else {
        return Some(None);
    };
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        permit = Arc::clone(semaphore).acquire_owned() => permit.ok().map(Some),
    }
}

async fn dispatch_results<F: Fetcher, D: DedupFilter>(
    shared: Arc<Shared<F, D>>,
    tracker: TaskTracker,
    limit: Option<Arc<Semaphore>>,
) {
    while let Some(result) = shared.router.next_result().await {
        let Some(permit) = acquire(&limit, shared.router.cancellation_token()).await else {
            break;
        };
        let shared = Arc::clone(&shared);
        tracker.spawn(async move {
            shared.extract_one(result, permit).await;
            shared.router.in_flight().done();
        });
    }
}

async fn dispatch_records<F: Fetcher, D: DedupFilter>(
    shared: Arc<Shared<F, D>>,
    tracker: TaskTracker,
    limit: Option<Arc<Semaphore>>,
) {
    while let Some(record) = shared.router.next_record().await {
        let Some(permit) = acquire(&limit, shared.router.cancellation_token()).await else {
            break;
        };
        let shared = Arc::clone(&shared);
        tracker.spawn(async move {
            shared.sink_one(record).await;
            drop(permit);
            shared.router.in_flight().done();
        });
    }
}

async fn pump<F: Fetcher, D: DedupFilter, S: Source>(shared: Arc<Shared<F, D>>, mut source: S) {
    let cancel = shared.router.cancellation_token().clone();
    let mut pulled = 0u64;
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = source.next() => item,
        };
        let Some(item) = item else {
            break;
        };
        pulled += 1;
        tracing::debug!(kind = item.kind(), "Source produced");
        let call = shared.counters.source.begin();
        let routed = shared.router.route(item).await;
        call.finish(routed);
    }
    shared.router.in_flight().source_finished();
    tracing::info!(items = pulled, "Source exhausted");
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Control and introspection for a running engine.
pub struct EngineHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<StageCounters>,
    status: Weak<dyn RouterStatus>,
}

impl EngineHandle {
    /// Resolve once the source has ended and everything routed so far has
    /// been fully processed, or once the engine is cancelled.
    pub async fn wait_drained(&self) {
        let Some(status) = self.status.upgrade() else {
            return;
        };
        status.in_flight().wait(&self.cancel).await;
    }

    /// Stop every task and wait for them to exit. The error stream closes
    /// after this returns.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Engine stopped");
    }

    /// Request cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.status.strong_count() > 0
    }

    /// True if all three queues are empty at this instant.
    pub fn idle(&self) -> bool {
        self.status
            .upgrade()
            .is_none_or(|status| status.queue_lengths().is_empty())
    }

    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }

    pub fn summary(&self) -> EngineSummary {
        let (queues, in_flight, drained) = match self.status.upgrade() {
            Some(status) => {
                let in_flight = status.in_flight();
                (status.queue_lengths(), in_flight.count(), in_flight.is_drained())
            }
            None => (QueueLengths::default(), 0, false),
        };
        EngineSummary {
            stages: self.counters.summaries(),
            queues,
            in_flight,
            running: self.is_running(),
            drained,
        }
    }
}
