use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tally_categorize::CategorizeError;
use tally_pipeline::StoreError;
use thiserror::Error;
use tracing::debug;

pub type DbPool = Pool<Sqlite>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid stored mapping: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unknown job status: {0}")]
    InvalidStatus(String),
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => StoreError::NotFound(what),
            StorageError::Serialization(e) => StoreError::Serialization(e.to_string()),
            other => StoreError::database(other),
        }
    }
}

impl From<StorageError> for CategorizeError {
    fn from(e: StorageError) -> Self {
        CategorizeError::Source(e.to_string())
    }
}

/// Opens (creating if needed) the database at `path` and applies the schema.
pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA cache_size = -32000")
        .execute(&pool)
        .await?;
    configure(&pool).await?;

    debug!(path = %path.display(), "database ready");
    Ok(pool)
}

/// A private in-memory database. The single connection is never recycled,
/// so the data lives as long as the pool.
pub async fn create_memory_db() -> Result<DbPool, StorageError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    configure(&pool).await?;
    Ok(pool)
}

async fn configure(pool: &DbPool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;
    run_migrations(pool).await
}

async fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            currency TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            pattern TEXT NOT NULL,
            clean_name TEXT NOT NULL,
            category_id INTEGER,
            priority INTEGER NOT NULL DEFAULT 0,
            is_recurring INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // NULL user_id marks a system merchant.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merchants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            pattern TEXT NOT NULL,
            clean_name TEXT NOT NULL,
            category_id INTEGER,
            is_recurring INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS column_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            fingerprint TEXT NOT NULL,
            mapping TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_column_mappings_fingerprint ON column_mappings (fingerprint)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            account_id INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            file_name TEXT,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            processed_rows INTEGER NOT NULL DEFAULT 0,
            imported INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            duplicates INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            started_at TEXT NOT NULL DEFAULT (datetime('now')),
            finished_at TEXT,
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            job_id INTEGER NOT NULL,
            row_number INTEGER NOT NULL,
            date TEXT NOT NULL,
            occurred_at TEXT,
            description TEXT NOT NULL,
            merchant_name TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL,
            category_id INTEGER,
            merchant_id INTEGER,
            rule_id INTEGER,
            is_recurring INTEGER NOT NULL DEFAULT 0,
            source_category TEXT,
            tag TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (account_id, date, amount_minor, description),
            FOREIGN KEY (account_id) REFERENCES accounts(id),
            FOREIGN KEY (job_id) REFERENCES import_jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_insights (
            job_id INTEGER PRIMARY KEY,
            categorization_rate REAL NOT NULL,
            date_quality REAL NOT NULL,
            amount_quality REAL NOT NULL,
            duplicates_skipped INTEGER NOT NULL,
            rows_total INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (job_id) REFERENCES import_jobs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_source_health (
            account_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            imports INTEGER NOT NULL,
            last_status TEXT,
            last_import_at TEXT,
            avg_categorization_rate REAL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = create_memory_db().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "accounts",
                "category_rules",
                "column_mappings",
                "data_source_health",
                "import_insights",
                "import_jobs",
                "merchants",
                "transactions",
            ]
        );
    }

    #[tokio::test]
    async fn file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");
        let pool = create_db(&path).await.unwrap();
        pool.close().await;
        assert!(path.exists());

        // Reopening an existing file keeps working.
        create_db(&path).await.unwrap();
    }
}
