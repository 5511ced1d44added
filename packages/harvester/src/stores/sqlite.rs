//! SQLite cache implementation.
//!
//! A file-based backend that survives restarts, which is what makes an
//! interrupted run resumable. Good for:
//! - Local batch runs
//! - Single-machine deployments
//! - Testing with persistent data

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};
use crate::traits::cache::StageCache;

/// SQLite-backed stage cache.
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open (creating if needed) the database at `database_url`.
    ///
    /// # Example URLs
    /// - `sqlite://harvester.db` - File next to the working directory
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    pub async fn new(database_url: &str) -> CacheResult<Self> {
        let in_memory = database_url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // every connection to :memory: is a separate database
        let max_connections = if in_memory { 1 } else { 5 };

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(backend)?;

        let cache = Self { pool };
        cache.run_migrations().await?;
        Ok(cache)
    }

    /// Create an in-memory cache (for testing).
    pub async fn in_memory() -> CacheResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> CacheResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_cache (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> CacheError {
    CacheError::Backend(Box::new(e))
}

#[async_trait]
impl StageCache for SqliteCache {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM stage_cache WHERE namespace = ? AND key = ?")
                .bind(namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO stage_cache (namespace, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(&raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn contains(&self, namespace: &str, key: &str) -> CacheResult<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM stage_cache WHERE namespace = ? AND key = ?")
                .bind(namespace)
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;

        Ok(count.0 > 0)
    }

    async fn delete(&self, namespace: &str, key: &str) -> CacheResult<()> {
        sqlx::query("DELETE FROM stage_cache WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn keys(&self, namespace: &str) -> CacheResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM stage_cache WHERE namespace = ? ORDER BY key")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
