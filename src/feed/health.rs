//! Feed health transitions.
//!
//! Both transitions are compare-and-swap writes on `version`: a write whose
//! expected version no longer matches the row fails with `EditConflict` and
//! changes nothing.

use super::repository::{FeedRow, FEED_COLUMNS};
use super::types::{Feed, FeedContent, MAX_FAILURE_LENGTH};
use crate::db::{format_datetime, DbPool, SQL_NOW};
use crate::{Result, SemaphoreError};

/// Records fetch outcomes on feed rows.
pub struct FeedHealthTracker<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedHealthTracker<'a> {
    /// Create a new tracker instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Success transition: overwrite content, clear failure state, stamp the
    /// fetch time and bump the version.
    ///
    /// `feed` is the state the caller read; its version is the expected one.
    pub async fn record_success(&self, feed: &Feed, content: &FeedContent) -> Result<Feed> {
        let query = format!(
            r#"
            UPDATE feeds
            SET title = ?, description = ?, link = ?, image_url = ?, feed_format = ?,
                feed_version = ?, language = ?, pub_date = ?, pub_updated = ?,
                last_fetch_at = {SQL_NOW},
                last_failure = NULL,
                last_failure_at = NULL,
                failure_count = 0,
                version = version + 1,
                updated_at = {SQL_NOW}
            WHERE id = ? AND version = ?
            RETURNING {FEED_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(&content.title)
            .bind(&content.description)
            .bind(&content.link)
            .bind(&content.image_url)
            .bind(&content.feed_format)
            .bind(&content.feed_version)
            .bind(&content.language)
            .bind(content.pub_date.as_ref().map(format_datetime))
            .bind(content.pub_updated.as_ref().map(format_datetime))
            .bind(feed.id)
            .bind(feed.version)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        row.map(Feed::from).ok_or(SemaphoreError::EditConflict)
    }

    /// Failure transition: record the reason and time, count the failure and
    /// bump the version. Content is left untouched.
    pub async fn record_failure(&self, feed: &Feed, reason: &str) -> Result<Feed> {
        let reason: String = reason.chars().take(MAX_FAILURE_LENGTH).collect();
        let query = format!(
            r#"
            UPDATE feeds
            SET last_failure = ?,
                last_failure_at = {SQL_NOW},
                failure_count = failure_count + 1,
                version = version + 1,
                updated_at = {SQL_NOW}
            WHERE id = ? AND version = ?
            RETURNING {FEED_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(&reason)
            .bind(feed.id)
            .bind(feed.version)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        row.map(Feed::from).ok_or(SemaphoreError::EditConflict)
    }
}
