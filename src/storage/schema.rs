use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

/// Handle over the SQLite pool. Exclusively owns durable rows; every other
/// component treats it as an opaque collaborator.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// Pass `":memory:"` for an ephemeral database (tests).
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Handles transient contention between
        // the sweep task and a running batch.
        // Pragmas set here apply to every connection the pool opens.
        let options = SqliteConnectOptions::from_str(&url)?
            .pragma("busy_timeout", "5000")
            .pragma("foreign_keys", "ON");

        // SQLite is single-writer; 5 connections covers the sweep task, the
        // batch task, and control-surface reads.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(db)
    }

    /// Run schema migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op. If any step fails the transaction rolls back and
    /// the database keeps its previous consistent state.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_checked_ms INTEGER,
                last_error TEXT
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES sources(id),
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL UNIQUE,
                published_ms INTEGER NOT NULL,
                captured_ms INTEGER NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                brief_generated INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_ms)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_category_published \
             ON articles(category, published_ms)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS briefs (
                id TEXT PRIMARY KEY,
                headline TEXT NOT NULL,
                body TEXT NOT NULL,
                source_urls TEXT NOT NULL,
                category TEXT NOT NULL,
                published_ms INTEGER NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                tokens INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                processing_ms INTEGER NOT NULL DEFAULT 0,
                subjectivity REAL NOT NULL DEFAULT 0,
                revision_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_briefs_category_published \
             ON briefs(category, published_ms)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processing_logs (
                id INTEGER PRIMARY KEY,
                success INTEGER NOT NULL,
                articles_processed INTEGER NOT NULL,
                briefs_generated INTEGER NOT NULL,
                errors TEXT NOT NULL DEFAULT '[]',
                processing_ms INTEGER NOT NULL,
                tokens_used INTEGER NOT NULL,
                cost REAL NOT NULL,
                model TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
}
