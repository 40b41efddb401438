pub mod config;
pub mod database;
pub mod fingerprint_filter;
pub mod record_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use fingerprint_filter::{FingerprintFilter, fingerprint};
pub use record_repository::{RecordRepository, StoredRecord};
