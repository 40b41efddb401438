//! Per-stage call accounting.
//!
//! Every stage invocation moves through `call -> in flight -> done | fail`.
//! The four counts live behind one lock so each transition is a single
//! compound update and a snapshot always satisfies
//! `call_count == in_flight_count + done_count + fail_count`.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::sequence::{STAGE_SERIAL, SerialRegistry};

/// The four pluggable stages of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Source,
    Fetcher,
    Extractor,
    Pipeline,
}

impl StageKind {
    /// Prefix letter used in stage identifiers.
    pub fn letter(&self) -> char {
        match self {
            StageKind::Source => 'S',
            StageKind::Fetcher => 'F',
            StageKind::Extractor => 'E',
            StageKind::Pipeline => 'P',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Fetcher => "fetcher",
            StageKind::Extractor => "extractor",
            StageKind::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage identifier such as `F3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub fn new(kind: StageKind, serial: u64) -> Self {
        Self(format!("{}{}", kind.letter(), serial))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time copy of a stage's counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub call_count: u64,
    pub in_flight_count: u64,
    pub done_count: u64,
    pub fail_count: u64,
}

impl CounterSnapshot {
    /// True when the accounting identity holds.
    pub fn is_consistent(&self) -> bool {
        self.call_count == self.in_flight_count + self.done_count + self.fail_count
    }
}

/// Read-only report for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub id: StageId,
    pub kind: StageKind,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
}

/// Call accounting for one stage.
#[derive(Debug)]
pub struct Counters {
    id: StageId,
    kind: StageKind,
    state: Mutex<CounterSnapshot>,
}

impl Counters {
    /// Create counters for a stage, drawing its identifier from `registry`.
    pub fn new(kind: StageKind, registry: &SerialRegistry) -> Self {
        let serial = registry.get_or_create(STAGE_SERIAL).next();
        Self {
            id: StageId::new(kind, serial),
            kind,
            state: Mutex::new(CounterSnapshot::default()),
        }
    }

    pub fn id(&self) -> &StageId {
        &self.id
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    fn lock_state(&self) -> MutexGuard<'_, CounterSnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(stage = %self.id, "Recovered from poisoned counter lock");
            poisoned.into_inner()
        })
    }

    /// Record a new invocation. Settle the returned guard with
    /// [`CallGuard::done`] or [`CallGuard::fail`]; dropping it unsettled
    /// counts as a failure.
    pub fn begin(&self) -> CallGuard<'_> {
        {
            let mut state = self.lock_state();
            state.call_count += 1;
            state.in_flight_count += 1;
        }
        CallGuard {
            counters: self,
            settled: false,
        }
    }

    fn settle(&self, success: bool) {
        let mut state = self.lock_state();
        state.in_flight_count = state.in_flight_count.saturating_sub(1);
        if success {
            state.done_count += 1;
        } else {
            state.fail_count += 1;
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        *self.lock_state()
    }

    pub fn summary(&self) -> StageSummary {
        StageSummary {
            id: self.id.clone(),
            kind: self.kind,
            counters: self.snapshot(),
        }
    }

    /// Zero all counts. Only meaningful while nothing is in flight.
    pub fn reset(&self) {
        *self.lock_state() = CounterSnapshot::default();
    }
}

/// An in-flight invocation of a stage.
#[must_use = "an unsettled call is counted as failed when dropped"]
pub struct CallGuard<'a> {
    counters: &'a Counters,
    settled: bool,
}

impl CallGuard<'_> {
    pub fn done(mut self) {
        self.settled = true;
        self.counters.settle(true);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.counters.settle(false);
    }

    /// Settle according to `success`.
    pub fn finish(self, success: bool) {
        if success { self.done() } else { self.fail() }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.counters.settle(false);
        }
    }
}
