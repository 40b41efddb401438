//! The sink chain: ordered record processors.

use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::CrawlError;
use crate::models::Record;
use crate::traits::{Processor, ProcessorRef, processor};

/// Ordered chain of processors applied to one record at a time.
#[derive(Clone)]
pub struct Pipeline {
    processors: Vec<ProcessorRef>,
}

impl Pipeline {
    /// Build a chain. Fails on an empty list.
    pub fn new(processors: Vec<ProcessorRef>) -> Result<Self, CrawlError> {
        if processors.is_empty() {
            return Err(CrawlError::ConfigError(
                "Pipeline needs at least one processor".into(),
            ));
        }
        Ok(Self { processors })
    }

    /// Chain of exactly one processor.
    pub fn solo(p: ProcessorRef) -> Self {
        Self {
            processors: vec![p],
        }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run `record` through every processor in order.
    ///
    /// Errors are collected and the chain continues, except
    /// [`CrawlError::DropRecord`], which is appended and ends the chain.
    pub async fn send(&self, record: &mut Record) -> Vec<CrawlError> {
        let mut errors = Vec::new();
        for p in &self.processors {
            if let Err(e) = p.process(record).await {
                let stop = e.is_drop();
                errors.push(e);
                if stop {
                    break;
                }
            }
        }
        errors
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("processors", &self.processors.len())
            .finish()
    }
}

/// Print each record as one JSON line on stdout.
pub fn print_record() -> ProcessorRef {
    processor(|record: &mut Record| {
        let line = serde_json::to_string(&*record)?;
        println!("{line}");
        Ok(())
    })
}

/// Keeps every record it sees. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    records: Arc<Mutex<Vec<Record>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Processor for Collector {
    fn process<'a>(&'a self, record: &'a mut Record) -> BoxFuture<'a, Result<(), CrawlError>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Checks records against a JSON Schema.
///
/// A non-conforming record fails with [`CrawlError::SchemaValidationError`],
/// or is dropped silently when built with [`SchemaValidator::dropping`].
pub struct SchemaValidator {
    validator: jsonschema::Validator,
    drop_invalid: bool,
}

impl SchemaValidator {
    pub fn new(schema: &Value) -> Result<Self, CrawlError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| CrawlError::ConfigError(format!("Invalid JSON schema: {e}")))?;
        Ok(Self {
            validator,
            drop_invalid: false,
        })
    }

    /// Load the schema from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::ConfigError(format!(
                "Failed to read schema file {}: {e}",
                path.display()
            ))
        })?;
        let schema: Value = serde_json::from_str(&raw).map_err(|e| {
            CrawlError::ConfigError(format!(
                "Invalid JSON in schema file {}: {e}",
                path.display()
            ))
        })?;
        Self::new(&schema)
    }

    /// Drop invalid records instead of reporting them.
    pub fn dropping(mut self) -> Self {
        self.drop_invalid = true;
        self
    }

    pub fn check(&self, record: &Record) -> Result<(), CrawlError> {
        let instance = Value::Object(record.fields().clone());
        let problems: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();
        if problems.is_empty() {
            return Ok(());
        }
        if self.drop_invalid {
            tracing::debug!(problems = problems.len(), "Dropping record that fails schema");
            return Err(CrawlError::DropRecord);
        }
        Err(CrawlError::SchemaValidationError(problems.join("; ")))
    }
}

impl Processor for SchemaValidator {
    fn process<'a>(&'a self, record: &'a mut Record) -> BoxFuture<'a, Result<(), CrawlError>> {
        Box::pin(std::future::ready(self.check(record)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::{RecordingProcessor, failing_processor};

    #[tokio::test]
    async fn test_drop_short_circuits() {
        let log = RecordingProcessor::new();
        let pipeline = Pipeline::new(vec![
            log.step("p1"),
            log.step_with("p2", || Err(CrawlError::DropRecord)),
            log.step("p3"),
        ])
        .unwrap();

        let errors = pipeline.send(&mut Record::new()).await;
        assert_eq!(log.calls(), vec!["p1", "p2"]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_drop());
    }

    #[tokio::test]
    async fn test_other_errors_are_collected() {
        let log = RecordingProcessor::new();
        let pipeline = Pipeline::new(vec![
            log.step("p1"),
            log.step_with("p2", || Err(CrawlError::ProcessorError("p2 failed".into()))),
            log.step("p3"),
        ])
        .unwrap();

        let errors = pipeline.send(&mut Record::new()).await;
        assert_eq!(log.calls(), vec!["p1", "p2", "p3"]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CrawlError::ProcessorError(msg) if msg == "p2 failed"));
    }

    #[tokio::test]
    async fn test_processors_share_the_record() {
        let stamp = processor(|record: &mut Record| {
            record.insert("stamped", true);
            Ok(())
        });
        let collector = Collector::new();
        let sink: ProcessorRef = Arc::new(collector.clone());
        let pipeline = Pipeline::new(vec![stamp, sink]).unwrap();

        let mut record = Record::new().with("url", "https://example.com");
        assert!(pipeline.send(&mut record).await.is_empty());
        assert_eq!(record.get("stamped"), Some(&json!(true)));
        assert_eq!(collector.records()[0].get("stamped"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_all_failures_reported() {
        let pipeline = Pipeline::new(vec![failing_processor("a"), failing_processor("b")]).unwrap();
        let errors = pipeline.send(&mut Record::new()).await;
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert!(matches!(
            Pipeline::new(Vec::new()),
            Err(CrawlError::ConfigError(_))
        ));
    }

    fn page_schema() -> Value {
        json!({
            "type": "object",
            "required": ["url", "title"],
            "properties": {
                "url": {"type": "string"},
                "title": {"type": "string"}
            }
        })
    }

    #[tokio::test]
    async fn test_schema_validator_reports_invalid() {
        let validator = SchemaValidator::new(&page_schema()).unwrap();
        let mut good = Record::new().with("url", "u").with("title", "t");
        let mut bad = Record::new().with("url", "u");

        assert!(validator.process(&mut good).await.is_ok());
        assert!(matches!(
            validator.process(&mut bad).await,
            Err(CrawlError::SchemaValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_schema_validator_drop_mode() {
        let validator = SchemaValidator::new(&page_schema()).unwrap().dropping();
        let mut bad = Record::new().with("title", 42);
        assert!(matches!(
            validator.process(&mut bad).await,
            Err(CrawlError::DropRecord)
        ));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let schema = json!({"type": "not-a-type"});
        assert!(matches!(
            SchemaValidator::new(&schema),
            Err(CrawlError::ConfigError(_))
        ));
    }
}
