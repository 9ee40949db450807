//! Feed repository for Semaphore.

use chrono::{DateTime, Utc};

use super::types::{Feed, NewFeed};
use crate::db::{
    format_datetime, like_pattern, parse_datetime, DbPool, PaginatedResult, Pagination, SQL_NOW,
};
use crate::error::is_unique_violation;
use crate::{Result, SemaphoreError};

/// Column list matching [`FeedRow`].
pub(super) const FEED_COLUMNS: &str = "id, title, description, link, feed_link, image_url, \
    feed_type, feed_format, feed_version, language, pub_date, pub_updated, added_by, \
    follower_count, last_fetch_at, last_failure, last_failure_at, failure_count, version, \
    created_at, updated_at";

/// Row type for feed from database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct FeedRow {
    id: i64,
    title: String,
    description: String,
    link: String,
    feed_link: String,
    image_url: Option<String>,
    feed_type: String,
    feed_format: String,
    feed_version: String,
    language: Option<String>,
    pub_date: Option<String>,
    pub_updated: Option<String>,
    added_by: Option<i64>,
    follower_count: i64,
    last_fetch_at: Option<String>,
    last_failure: Option<String>,
    last_failure_at: Option<String>,
    failure_count: i64,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            title: row.title,
            description: row.description,
            link: row.link,
            feed_link: row.feed_link,
            image_url: row.image_url,
            feed_type: row.feed_type,
            feed_format: row.feed_format,
            feed_version: row.feed_version,
            language: row.language,
            pub_date: row.pub_date.and_then(|s| parse_datetime(&s)),
            pub_updated: row.pub_updated.and_then(|s| parse_datetime(&s)),
            added_by: row.added_by,
            follower_count: row.follower_count,
            last_fetch_at: row.last_fetch_at.and_then(|s| parse_datetime(&s)),
            last_failure: row.last_failure,
            last_failure_at: row.last_failure_at.and_then(|s| parse_datetime(&s)),
            failure_count: row.failure_count,
            version: row.version,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Repository for feed catalog operations.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new feed.
    ///
    /// Returns `Duplicate` when another feed already uses the same fetch URL.
    pub async fn create(&self, feed: &NewFeed) -> Result<Feed> {
        let content = &feed.content;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feeds (title, description, link, feed_link, image_url, feed_type,
                               feed_format, feed_version, language, pub_date, pub_updated,
                               added_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&content.title)
        .bind(&content.description)
        .bind(&content.link)
        .bind(&feed.feed_link)
        .bind(&content.image_url)
        .bind(&feed.feed_type)
        .bind(&content.feed_format)
        .bind(&content.feed_version)
        .bind(&content.language)
        .bind(content.pub_date.as_ref().map(format_datetime))
        .bind(content.pub_updated.as_ref().map(format_datetime))
        .bind(feed.added_by)
        .fetch_one(self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SemaphoreError::Duplicate("feed".into())
            } else {
                SemaphoreError::Database(e.to_string())
            }
        })?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| SemaphoreError::NotFound("feed".into()))
    }

    /// Get a feed by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?");
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    /// Get a feed by its fetch URL.
    pub async fn get_by_feed_link(&self, feed_link: &str) -> Result<Option<Feed>> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE feed_link = ?");
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(feed_link)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    /// List all feeds (ordered by ID).
    pub async fn list_all(&self) -> Result<Vec<Feed>> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id ASC");
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Search the catalog by title, most followed first.
    ///
    /// An empty `title` matches every feed; a non-empty `feed_link` must
    /// match exactly. Title matching is a substring match, case-insensitive
    /// for ASCII.
    pub async fn search(
        &self,
        title: &str,
        feed_link: &str,
        page: Pagination,
    ) -> Result<PaginatedResult<Feed>> {
        const FILTER: &str = "WHERE title LIKE ? ESCAPE '\\' AND (feed_link = ? OR ? = '')";
        let (offset, limit) = page.bounds();
        let pattern = like_pattern(title);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM feeds {FILTER}"))
            .bind(&pattern)
            .bind(feed_link)
            .bind(feed_link)
            .fetch_one(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        let query = format!(
            "SELECT {FEED_COLUMNS} FROM feeds {FILTER} \
             ORDER BY follower_count DESC, id ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .bind(&pattern)
            .bind(feed_link)
            .bind(feed_link)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(PaginatedResult::new(
            rows.into_iter().map(Feed::from).collect(),
            total,
            page,
        ))
    }

    /// List feeds whose latest fetch or failure is older than `older_than`.
    ///
    /// Feeds that were never checked are always included, oldest check first.
    pub async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Feed>> {
        let query = format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds
            WHERE MAX(COALESCE(last_fetch_at, ''), COALESCE(last_failure_at, '')) < ?
            ORDER BY MAX(COALESCE(last_fetch_at, ''), COALESCE(last_failure_at, '')) ASC, id ASC
            "#
        );
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .bind(format_datetime(&older_than))
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Recompute the denormalized follower count of every feed.
    ///
    /// Only rows whose count actually changed are written (and versioned).
    /// Returns the number of feeds updated.
    pub async fn recompute_follower_counts(&self) -> Result<u64> {
        let query = format!(
            r#"
            UPDATE feeds
            SET follower_count = (SELECT COUNT(*) FROM feed_follows WHERE feed_id = feeds.id),
                version = version + 1,
                updated_at = {SQL_NOW}
            WHERE follower_count <> (SELECT COUNT(*) FROM feed_follows WHERE feed_id = feeds.id)
            "#
        );
        let result = sqlx::query(&query)
            .execute(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
