//! Orchestration core of the Skein crawl engine.
//!
//! Work flows `Source -> Router -> fetch workers -> Router -> extraction ->
//! Router -> sink chain`, with every failure reported on a single error
//! stream returned by [`Engine::run`].

pub mod config;
pub mod counters;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod sequence;
pub mod source;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod traits;

pub use config::EngineConfig;
pub use counters::{CounterSnapshot, Counters, StageId, StageKind, StageSummary};
pub use engine::{Engine, EngineHandle, EngineSummary, StageCounters};
pub use error::CrawlError;
pub use extractor::{DEFAULT_CALLBACK, Extractor, body_reader};
pub use filter::{DedupFilter, MemoryFilter, NullFilter};
pub use models::{
    Body, FetchRequest, FetchResult, Headers, Meta, Method, Record, WorkItem, normalize_url,
    resource_id,
};
pub use pipeline::{Collector, Pipeline, SchemaValidator, print_record};
pub use router::{ErrorStream, QueueCapacities, QueueLengths, Router};
pub use sequence::{Serial, SerialRegistry};
pub use source::{Generator, GeneratorHandle, IterSource};
pub use traits::{Fetcher, Parser, ParserRef, Processor, ProcessorRef, Source, parser, processor};
