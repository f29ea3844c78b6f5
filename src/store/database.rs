//! SQLite connection handling for the log store
//!
//! `LogDb` is constructed explicitly by the process entry point, handed to
//! the writers that need it, and closed explicitly on shutdown.

use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

/// Log store handle
///
/// Owns the SQLite connection pool. All writes go through transactions opened
/// on this pool.
pub struct LogDb {
    pool: SqlitePool,
}

impl LogDb {
    /// Connect and bring the schema up to date
    ///
    /// # Example
    ///
    /// ```ignore
    /// let db = LogDb::connect(&cfg.database).await?;
    /// ```
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(StoreError::Connect)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        // Each in-memory connection is its own database
        let in_memory = config.url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { config.max_connections };

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Connect(sqlx::Error::Io(e)))?;
                }
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(pool).await?;

        tracing::info!("Log store migrations completed");
        Ok(())
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection, waiting for checked-out ones to return
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Log store closed");
    }

    /// Row counts per table
    pub async fn get_stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            requests: self.count("request").await?,
            responses: self.count("response").await?,
            assets: self.count("asset").await?,
            prompts: self.count("prompt_v2").await?,
            prompt_versions: self.count("prompt_version").await?,
            prompt_input_keys: self.count("prompt_input_key").await?,
            prompt_input_records: self.count("prompt_input_record").await?,
            search_rows: self.count("request_response_search").await?,
        })
    }

    async fn count(&self, table: &'static str) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub requests: u64,
    pub responses: u64,
    pub assets: u64,
    pub prompts: u64,
    pub prompt_versions: u64,
    pub prompt_input_keys: u64,
    pub prompt_input_records: u64,
    pub search_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_database_creation() {
        let db = LogDb::connect(&memory_config()).await.unwrap();
        let stats = db.get_stats().await.unwrap();

        assert_eq!(stats, StoreStats::default());
        db.close().await;
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nested.db");
        let config = DatabaseConfig {
            url: format!("sqlite:{}", path.display()),
            ..DatabaseConfig::default()
        };

        let db = LogDb::connect(&config).await.unwrap();
        db.close().await;
        assert!(path.exists());

        // Reconnecting re-runs migrations as a no-op
        let db = LogDb::connect(&config).await.unwrap();
        assert_eq!(db.get_stats().await.unwrap().requests, 0);
        db.close().await;
    }
}
