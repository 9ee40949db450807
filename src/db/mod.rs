//! Database module for Semaphore.
//!
//! This module provides SQLite connectivity through an sqlx pool and
//! migration management.

mod schema;

pub use schema::MIGRATIONS;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::{Result, SemaphoreError};

/// Connection pool type used by every repository.
pub type DbPool = SqlitePool;

/// SQL expression for the current timestamp in the stored text format.
pub const SQL_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Format a timestamp the way it is stored.
///
/// Fixed-width millisecond precision keeps text comparison chronological.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Rows written by plain datetime('now')
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

/// Build a `LIKE` pattern matching `term` anywhere in a column.
///
/// `%`, `_` and `\` in the term match literally; use with `ESCAPE '\'`.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Pagination parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Number of rows to skip.
    pub offset: i64,
    /// Maximum number of rows to return.
    pub limit: i64,
}

impl Pagination {
    /// Create new pagination parameters.
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Create pagination for the first page with given limit.
    pub fn first(limit: i64) -> Self {
        Self { offset: 0, limit }
    }

    /// Offset and limit with negatives treated as zero.
    pub(crate) fn bounds(&self) -> (i64, i64) {
        (self.offset.max(0), self.limit.max(0))
    }
}

/// Result of a paginated query.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    /// The rows in this page.
    pub items: Vec<T>,
    /// Total number of rows across all pages.
    pub total: i64,
    /// Current offset.
    pub offset: i64,
    /// Limit used for this query.
    pub limit: i64,
}

impl<T> PaginatedResult<T> {
    /// Check if there are more rows after this page.
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as i64) < self.total
    }

    /// Get the next page pagination, or None if no more pages.
    pub fn next_page(&self) -> Option<Pagination> {
        if self.has_more() {
            Some(Pagination::new(self.offset + self.limit, self.limit))
        } else {
            None
        }
    }

    pub(crate) fn new(items: Vec<T>, total: i64, page: Pagination) -> Self {
        let (offset, limit) = page.bounds();
        Self {
            items,
            total,
            offset,
            limit,
        }
    }

    pub(crate) fn empty(page: Pagination) -> Self {
        Self::new(Vec::new(), 0, page)
    }
}

/// Run a storage operation bounded by `limit`.
///
/// An elapsed limit becomes `Timeout`; the dropped future rolls back any
/// transaction it held.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SemaphoreError::Timeout(what.to_string())),
    }
}

/// Database wrapper for managing the SQLite pool and migrations.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open a database at the specified path.
    ///
    /// If the database file doesn't exist, it will be created.
    /// Migrations are automatically applied.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| SemaphoreError::DatabaseConnection(e.to_string()))?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Open an in-memory database for testing.
    ///
    /// The pool holds exactly one connection that never expires, since every
    /// new connection would see its own empty database.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SemaphoreError::DatabaseConnection(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| SemaphoreError::DatabaseConnection(e.to_string()))?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        if !self.table_exists("schema_version").await? {
            return Ok(0);
        }

        let version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        Ok(version)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        let current_version = self.schema_version().await?;
        let migrations = MIGRATIONS;

        if current_version as usize >= migrations.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            migrations.len()
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        // Apply each pending migration in a transaction
        for (i, migration) in migrations.iter().enumerate().skip(current_version as usize) {
            let version = (i + 1) as i64;
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;

            sqlx::raw_sql(migration).execute(&mut *tx).await?;

            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            debug!("Migration v{} applied successfully", version);
        }

        info!(
            "Database migration complete (now at version {})",
            migrations.len()
        );
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
        )
        .bind(table_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_migrations_applied() {
        let db = Database::open_in_memory().await.unwrap();

        for table in [
            "feeds",
            "items",
            "walls",
            "wall_feeds",
            "liked_items",
            "saved_items",
            "feed_follows",
        ] {
            assert!(db.table_exists(table).await.unwrap(), "missing {table}");
        }
        assert!(!db.table_exists("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("semaphore.db");

        {
            let db = Database::open(&path, 2).await.unwrap();
            assert!(db.table_exists("items").await.unwrap());
            db.pool().close().await;
        }

        // Reopening does not re-run migrations
        let db = Database::open(&path, 2).await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_sql_now_matches_stored_format() {
        let db = Database::open_in_memory().await.unwrap();
        let now: String = sqlx::query_scalar(&format!("SELECT {SQL_NOW}"))
            .fetch_one(db.pool())
            .await
            .unwrap();

        assert_eq!(now.len(), "2024-01-01T00:00:00.000Z".len());
        assert!(parse_datetime(&now).is_some());
    }

    #[test]
    fn test_format_datetime_is_fixed_width() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(format_datetime(&dt), "2024-03-05T07:08:09.000Z");
        assert_eq!(parse_datetime("2024-03-05T07:08:09.000Z"), Some(dt));
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let ok = with_timeout(Duration::from_secs(1), "fast", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let slow = with_timeout(Duration::from_millis(10), "slow query", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(slow, Err(SemaphoreError::Timeout(what)) if what == "slow query"));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rust"), "%rust%");
        assert_eq!(like_pattern("  rust "), "%rust%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
        assert_eq!(like_pattern(""), "%%");
    }

    #[test]
    fn test_paginated_result_next_page() {
        let page = PaginatedResult::new(vec![1, 2], 5, Pagination::first(2));
        assert!(page.has_more());
        assert_eq!(page.next_page(), Some(Pagination::new(2, 2)));

        let last = PaginatedResult::new(vec![5], 5, Pagination::new(4, 2));
        assert!(!last.has_more());
        assert_eq!(last.next_page(), None);

        let clamped = PaginatedResult::<i64>::empty(Pagination::new(-3, -1));
        assert_eq!((clamped.offset, clamped.limit), (0, 0));
    }

    #[test]
    fn test_parse_datetime_legacy_format() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(parse_datetime("2024-03-05 07:08:09"), Some(dt));
        assert_eq!(parse_datetime("garbage"), None);
    }
}
