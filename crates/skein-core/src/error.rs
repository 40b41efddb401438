use thiserror::Error;

/// Error taxonomy shared by every stage of the crawl engine.
///
/// Construction-time problems surface as [`CrawlError::ConfigError`] from the
/// constructor that detected them. Everything else is a per-item failure and
/// travels on the engine's error stream.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// The request's resource identity was already seen by the dedup filter.
    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    /// The request could not be built or is not fetchable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The fetched payload is unusable.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The response body was read a second time.
    #[error("Response body already consumed")]
    BodyConsumed,

    /// A callback name was set but is not a usable name.
    #[error("Invalid callback: {0:?}")]
    InvalidCallback(String),

    /// A callback name was set but no parser is registered under it.
    #[error("Callback not found: {0}")]
    CallbackNotFound(String),

    /// No callback was set and the registry has no default parser.
    #[error("No default parser registered")]
    NoDefaultParser,

    /// A parser yielded a fetch result, which only fetchers may produce.
    #[error("Extractor yielded a fetch result for {0}")]
    ResultFromExtractor(String),

    /// Sink control signal: stop processing the current record.
    #[error("Record dropped")]
    DropRecord,

    /// A sink processor failed on a record.
    #[error("Processor error: {0}")]
    ProcessorError(String),

    /// A parser could not make sense of a fetched page.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A record does not match the expected schema.
    #[error("Schema validation error: {0}")]
    SchemaValidationError(String),

    /// HTTP request failed or returned an unaccepted status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The dedup filter backend could not answer.
    #[error("Filter error: {0}")]
    FilterError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Malformed configuration detected at construction time.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl CrawlError {
    /// Returns true for the sink drop signal, which is not a failure.
    pub fn is_drop(&self) -> bool {
        matches!(self, CrawlError::DropRecord)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CrawlError::DuplicateRequest(_))
    }

    /// Returns true if resubmitting the same work item could succeed.
    ///
    /// The engine never retries on its own; this only helps callers that
    /// re-submit failed requests through their source.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlError::NetworkError(_) | CrawlError::Timeout(_) | CrawlError::FilterError(_) => {
                true
            }
            CrawlError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }
}
