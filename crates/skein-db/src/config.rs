use skein_core::CrawlError;

/// Name of the dedup set used when `SKEIN_FILTER_SET` is unset.
pub const DEFAULT_FILTER_SET: &str = "default";

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Dedup set that a [`FingerprintFilter`](crate::FingerprintFilter) writes to.
    pub filter_set: String,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `SKEIN_FILTER_SET` (optional, defaults to `default`)
    pub fn from_env() -> Result<Self, CrawlError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            CrawlError::ConfigError(
                "DATABASE_URL not set. Required for database operations.".into(),
            )
        })?;

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Err(_) => 5,
            Ok(raw) => parse_max_connections(&raw)?,
        };

        let filter_set = std::env::var("SKEIN_FILTER_SET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER_SET.to_string());

        Ok(Self {
            url,
            max_connections,
            filter_set,
        })
    }
}

fn parse_max_connections(raw: &str) -> Result<u32, CrawlError> {
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        CrawlError::ConfigError(format!(
            "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
        ))
    })?;
    if parsed == 0 {
        return Err(CrawlError::ConfigError(
            "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
        ));
    }
    Ok(parsed)
}
