// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use chunkline_core::error::{BatchError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Connections per pool; an in-memory database gets exactly one
const MAX_CONNECTIONS: u32 = 10;

/// Create SQLite connection pool with WAL mode and enforced foreign keys
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| BatchError::Config(format!("Invalid database url {}: {}", database_url, e)))?
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // Every connection to ":memory:" would open its own empty database
    let max_connections = if in_memory { 1 } else { MAX_CONNECTIONS };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_pool_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.db");
        let pool = create_pool(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        assert!(pool.acquire().await.is_ok());
        assert!(path.exists());
    }
}
