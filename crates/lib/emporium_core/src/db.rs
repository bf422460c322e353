//! PostgreSQL connection pool setup.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Default maximum number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 25;

/// Default idle time before a pooled connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: Duration,
    /// How long to wait for a free connection before failing.
    pub acquire_timeout: Duration,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Open a pool and verify it with a round trip.
pub async fn connect(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(
        max_connections = config.max_connections,
        "database connection pool established"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DbConfig::new("postgres://localhost/emporium");
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.idle_timeout, Duration::from_secs(900));
        assert_eq!(config.min_connections, 0);
    }
}
