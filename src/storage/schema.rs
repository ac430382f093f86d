use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::cache::QueryCache;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the SQLite store plus the injected query cache.
///
/// Cloning is cheap (pool handle + Arc); every component of the pipeline
/// holds its own clone.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) cache: Arc<QueryCache>,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// The cache instance is owned by the process and injected here so tests
    /// can supply a fresh or disabled cache per case.
    pub async fn open(path: &str, cache: Arc<QueryCache>) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Covers contention between a running
        // cycle and dashboard reads.
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");
        // Every pooled connection to ":memory:" would get its own empty
        // database, so in-memory mode pins the pool to a single connection.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool, cache };
        db.migrate()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(db)
    }

    /// Run schema migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running against an existing
    /// database is a no-op. A failure mid-way rolls the whole migration back.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Per-connection setting, must run outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_config (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                bot_token TEXT,
                chat_id TEXT NOT NULL DEFAULT '',
                stop_push INTEGER NOT NULL DEFAULT 0,
                only_title INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                post_id INTEGER NOT NULL UNIQUE,
                title TEXT NOT NULL,
                snippet TEXT NOT NULL,
                category TEXT NOT NULL,
                creator TEXT NOT NULL,
                push_status INTEGER NOT NULL DEFAULT 0,
                sub_id INTEGER,
                published_at INTEGER NOT NULL,
                delivered_at INTEGER,
                ingested_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Delivery loop reads unpushed posts oldest-first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_status_published ON posts(push_status, published_at)",
        )
        .execute(&mut *tx)
        .await?;
        // Retention cleanup and the 24h counter window filter on ingested_at
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_ingested ON posts(ingested_at)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_delivered ON posts(delivered_at)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY,
                keyword1 TEXT,
                keyword2 TEXT,
                keyword3 TEXT,
                creator TEXT,
                category TEXT,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Tie-break order is newest-created first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_created ON subscriptions(created_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
