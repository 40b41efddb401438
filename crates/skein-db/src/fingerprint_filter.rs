//! Approximate dedup set stored in PostgreSQL.

use sha2::{Digest, Sha256};
use skein_core::error::CrawlError;
use skein_core::filter::DedupFilter;
use sqlx::PgPool;

/// 64-bit fingerprint of a resource identity: the first eight bytes of its
/// SHA-256 digest.
pub fn fingerprint(identifier: &str) -> i64 {
    let digest = Sha256::digest(identifier.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

/// Dedup filter keeping one fingerprint per identifier in a named set.
///
/// Rows have a fixed width whatever the URL length. Two identifiers whose
/// fingerprints collide count as the same resource, so a page can be skipped
/// that was never fetched. Several crawlers can share one set.
#[derive(Clone)]
pub struct FingerprintFilter {
    pool: PgPool,
    set_name: String,
}

impl FingerprintFilter {
    pub fn new(pool: PgPool, set_name: impl Into<String>) -> Self {
        Self {
            pool,
            set_name: set_name.into(),
        }
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// Number of fingerprints in this set.
    pub async fn len(&self) -> Result<i64, CrawlError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM seen_fingerprints WHERE set_name = $1")
                .bind(&self.set_name)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| CrawlError::FilterError(e.to_string()))?;
        Ok(row.0)
    }

    /// Forget every identifier in this set. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64, CrawlError> {
        let result = sqlx::query("DELETE FROM seen_fingerprints WHERE set_name = $1")
            .bind(&self.set_name)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::FilterError(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

impl DedupFilter for FingerprintFilter {
    async fn seen(&self, identifier: &str) -> Result<bool, CrawlError> {
        let result = sqlx::query(
            r#"
            INSERT INTO seen_fingerprints (set_name, fingerprint)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&self.set_name)
        .bind(fingerprint(identifier))
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::FilterError(e.to_string()))?;

        Ok(result.rows_affected() == 0)
    }
}
