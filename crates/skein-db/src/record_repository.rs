use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use sha2::{Digest, Sha256};
use skein_core::error::CrawlError;
use skein_core::models::Record;
use skein_core::traits::Processor;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// A record as stored in the `records` table.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub url: Option<String>,
    pub data: serde_json::Value,
    pub data_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Repository for record persistence in PostgreSQL.
///
/// Also a sink [`Processor`]: put it in a pipeline to store every record
/// that reaches it.
#[derive(Clone)]
pub struct RecordRepository {
    pool: Pool<Postgres>,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Save a record. Returns the generated UUID.
    ///
    /// The record's `url` field, when it is a string, is stored in its own
    /// column for lookups.
    pub async fn save(&self, record: &Record) -> Result<Uuid, CrawlError> {
        let data = record.clone().into_value();
        let data_hash = hash_value(&data)?;

        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO records (url, data, data_hash)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(record.get_str("url"))
        .bind(&data)
        .bind(&data_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrawlError::DatabaseError(e.to_string()))?;

        tracing::debug!(id = %row.0, url = ?record.get_str("url"), "Record saved");
        Ok(row.0)
    }

    /// Most recent records, newest first, optionally for one URL only.
    pub async fn list_recent(
        &self,
        url: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, CrawlError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, url, data, data_hash, created_at
            FROM records
            WHERE $1::VARCHAR IS NULL OR url = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(url)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count(&self) -> Result<i64, CrawlError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CrawlError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), CrawlError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

impl Processor for RecordRepository {
    fn process<'a>(&'a self, record: &'a mut Record) -> BoxFuture<'a, Result<(), CrawlError>> {
        Box::pin(async move { self.save(record).await.map(|_| ()) })
    }
}

fn hash_value(data: &serde_json::Value) -> Result<String, CrawlError> {
    let bytes = serde_json::to_vec(data)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    url: Option<String>,
    data: serde_json::Value,
    data_hash: String,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            data: row.data,
            data_hash: row.data_hash,
            created_at: row.created_at,
        }
    }
}
