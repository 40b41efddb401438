use crate::error::CrawlError;
use crate::router::QueueCapacities;

/// Tuning knobs for an [`Engine`](crate::engine::Engine) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Fetch workers. 0 spawns one task per request instead of a pool.
    pub workers: usize,
    pub request_buffer: usize,
    pub result_buffer: usize,
    pub record_buffer: usize,
    /// Bound on concurrent extractions. `None` means one task per result.
    pub extract_workers: Option<usize>,
    /// Bound on concurrent sink runs. `None` means one task per record.
    pub sink_workers: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let queues = QueueCapacities::default();
        Self {
            workers: 4,
            request_buffer: queues.requests,
            result_buffer: queues.results,
            record_buffer: queues.records,
            extract_workers: None,
            sink_workers: None,
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set all three queue capacities at once.
    pub fn with_buffers(mut self, requests: usize, results: usize, records: usize) -> Self {
        self.request_buffer = requests;
        self.result_buffer = results;
        self.record_buffer = records;
        self
    }

    pub fn with_extract_workers(mut self, limit: usize) -> Self {
        self.extract_workers = Some(limit);
        self
    }

    pub fn with_sink_workers(mut self, limit: usize) -> Self {
        self.sink_workers = Some(limit);
        self
    }

    pub fn queue_capacities(&self) -> QueueCapacities {
        QueueCapacities {
            requests: self.request_buffer,
            results: self.result_buffer,
            records: self.record_buffer,
        }
    }

    /// Reject settings that would stall the engine.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.extract_workers == Some(0) {
            return Err(CrawlError::ConfigError(
                "extract_workers must be at least 1 when set".into(),
            ));
        }
        if self.sink_workers == Some(0) {
            return Err(CrawlError::ConfigError(
                "sink_workers must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Read configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// - `SKEIN_WORKERS`
    /// - `SKEIN_REQUEST_BUFFER`, `SKEIN_RESULT_BUFFER`, `SKEIN_RECORD_BUFFER`
    /// - `SKEIN_EXTRACT_WORKERS`, `SKEIN_SINK_WORKERS` (unset means unbounded)
    pub fn from_env() -> Result<Self, CrawlError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CrawlError> {
        let parse = |key: &str| -> Result<Option<usize>, CrawlError> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<usize>().map(Some).map_err(|_| {
                    CrawlError::ConfigError(format!(
                        "Invalid {key} '{raw}': must be a non-negative integer"
                    ))
                }),
            }
        };

        let defaults = Self::default();
        let config = Self {
            workers: parse("SKEIN_WORKERS")?.unwrap_or(defaults.workers),
            request_buffer: parse("SKEIN_REQUEST_BUFFER")?.unwrap_or(defaults.request_buffer),
            result_buffer: parse("SKEIN_RESULT_BUFFER")?.unwrap_or(defaults.result_buffer),
            record_buffer: parse("SKEIN_RECORD_BUFFER")?.unwrap_or(defaults.record_buffer),
            extract_workers: parse("SKEIN_EXTRACT_WORKERS")?,
            sink_workers: parse("SKEIN_SINK_WORKERS")?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.workers, 4);
        assert!(config.extract_workers.is_none());
    }

    #[test]
    fn test_reads_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SKEIN_WORKERS", "0"),
            ("SKEIN_REQUEST_BUFFER", "0"),
            ("SKEIN_SINK_WORKERS", "8"),
        ]))
        .unwrap();
        assert_eq!(config.workers, 0);
        assert_eq!(config.request_buffer, 0);
        assert_eq!(config.sink_workers, Some(8));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup(&[("SKEIN_WORKERS", "many")])).unwrap_err();
        assert!(matches!(err, CrawlError::ConfigError(msg) if msg.contains("SKEIN_WORKERS")));
    }

    #[test]
    fn test_zero_pool_bound_is_invalid() {
        assert!(EngineConfig::default().with_extract_workers(0).validate().is_err());
        assert!(EngineConfig::default().with_sink_workers(0).validate().is_err());
        assert!(EngineConfig::default().with_sink_workers(1).validate().is_ok());
    }
}
