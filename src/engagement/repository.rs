//! Engagement repository for Semaphore.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};

use super::types::{EngagedItem, ViewerFlags};
use crate::db::{like_pattern, parse_datetime, DbPool, PaginatedResult, Pagination};
use crate::error::is_foreign_key_violation;
use crate::item::{Item, ItemRow, ITEM_COLUMNS};
use crate::{Result, SemaphoreError};

const LIKED: &str = "liked_items";
const SAVED: &str = "saved_items";

/// Row type for a liked or saved item.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EngagedRow {
    #[sqlx(flatten)]
    item: ItemRow,
    feed_title: String,
    engaged_at: String,
}

impl From<EngagedRow> for EngagedItem {
    fn from(row: EngagedRow) -> Self {
        EngagedItem {
            item: Item::from(row.item),
            feed_title: row.feed_title,
            engaged_at: parse_datetime(&row.engaged_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Repository for likes, saves and follows.
///
/// Every mutation is idempotent and reports whether it changed anything.
pub struct EngagementRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> EngagementRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Like an item.
    pub async fn like(&self, user_id: i64, item_id: i64) -> Result<bool> {
        self.insert_pair(
            "INSERT OR IGNORE INTO liked_items (user_id, item_id) VALUES (?, ?)",
            user_id,
            item_id,
            "item",
        )
        .await
    }

    /// Remove a like.
    pub async fn unlike(&self, user_id: i64, item_id: i64) -> Result<bool> {
        self.delete_pair(
            "DELETE FROM liked_items WHERE user_id = ? AND item_id = ?",
            user_id,
            item_id,
        )
        .await
    }

    /// Save an item. Saved items survive cleanup.
    pub async fn save(&self, user_id: i64, item_id: i64) -> Result<bool> {
        self.insert_pair(
            "INSERT OR IGNORE INTO saved_items (user_id, item_id) VALUES (?, ?)",
            user_id,
            item_id,
            "item",
        )
        .await
    }

    /// Remove a save.
    pub async fn unsave(&self, user_id: i64, item_id: i64) -> Result<bool> {
        self.delete_pair(
            "DELETE FROM saved_items WHERE user_id = ? AND item_id = ?",
            user_id,
            item_id,
        )
        .await
    }

    /// Follow a feed.
    ///
    /// `feeds.follower_count` is reconciled by the recount job, not here.
    pub async fn follow(&self, user_id: i64, feed_id: i64) -> Result<bool> {
        self.insert_pair(
            "INSERT OR IGNORE INTO feed_follows (user_id, feed_id) VALUES (?, ?)",
            user_id,
            feed_id,
            "feed",
        )
        .await
    }

    /// Stop following a feed.
    pub async fn unfollow(&self, user_id: i64, feed_id: i64) -> Result<bool> {
        self.delete_pair(
            "DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?",
            user_id,
            feed_id,
        )
        .await
    }

    /// Number of likes on an item.
    pub async fn like_count(&self, item_id: i64) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM liked_items WHERE item_id = ?", item_id)
            .await
    }

    /// Number of saves on an item.
    pub async fn save_count(&self, item_id: i64) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM saved_items WHERE item_id = ?", item_id)
            .await
    }

    /// Which of `item_ids` the user liked.
    pub async fn liked_among(&self, user_id: i64, item_ids: &[i64]) -> Result<HashSet<i64>> {
        self.among(LIKED, user_id, item_ids).await
    }

    /// Which of `item_ids` the user saved.
    pub async fn saved_among(&self, user_id: i64, item_ids: &[i64]) -> Result<HashSet<i64>> {
        self.among(SAVED, user_id, item_ids).await
    }

    /// Like counts for `item_ids`. Items without likes are absent.
    pub async fn like_counts(&self, item_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT item_id, COUNT(*) FROM liked_items WHERE item_id IN (");
        let mut separated = query.separated(", ");
        for id in item_ids {
            separated.push_bind(*id);
        }
        query.push(") GROUP BY item_id");

        let rows: Vec<(i64, i64)> = query
            .build_query_as()
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().collect())
    }

    /// Like counts, plus the viewer's likes and saves when there is one.
    ///
    /// One query per flag, whatever the number of items.
    pub async fn viewer_flags(
        &self,
        user_id: Option<i64>,
        item_ids: &[i64],
    ) -> Result<ViewerFlags> {
        let like_counts = self.like_counts(item_ids).await?;
        let Some(user_id) = user_id else {
            return Ok(ViewerFlags {
                like_counts,
                ..Default::default()
            });
        };

        Ok(ViewerFlags {
            liked: self.liked_among(user_id, item_ids).await?,
            saved: self.saved_among(user_id, item_ids).await?,
            like_counts,
        })
    }

    /// A user's liked items, most recently liked first.
    ///
    /// An empty `title` matches every item.
    pub async fn list_liked(
        &self,
        user_id: i64,
        title: &str,
        page: Pagination,
    ) -> Result<PaginatedResult<EngagedItem>> {
        self.list_engaged(LIKED, user_id, title, page).await
    }

    /// A user's saved items, most recently saved first.
    ///
    /// An empty `title` matches every item.
    pub async fn list_saved(
        &self,
        user_id: i64,
        title: &str,
        page: Pagination,
    ) -> Result<PaginatedResult<EngagedItem>> {
        self.list_engaged(SAVED, user_id, title, page).await
    }

    async fn among(&self, table: &str, user_id: i64, item_ids: &[i64]) -> Result<HashSet<i64>> {
        if item_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT item_id FROM {table} WHERE user_id = "));
        query.push_bind(user_id);
        query.push(" AND item_id IN (");
        let mut separated = query.separated(", ");
        for id in item_ids {
            separated.push_bind(*id);
        }
        query.push(")");

        let ids: Vec<i64> = query
            .build_query_scalar()
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(ids.into_iter().collect())
    }

    async fn list_engaged(
        &self,
        table: &str,
        user_id: i64,
        title: &str,
        page: Pagination,
    ) -> Result<PaginatedResult<EngagedItem>> {
        let (offset, limit) = page.bounds();
        let pattern = like_pattern(title);

        let count_query = format!(
            "SELECT COUNT(*) FROM {table} e JOIN items i ON i.id = e.item_id \
             WHERE e.user_id = ? AND i.title LIKE ? ESCAPE '\\'"
        );
        let total: i64 = sqlx::query_scalar(&count_query)
            .bind(user_id)
            .bind(&pattern)
            .fetch_one(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        let query = format!(
            r#"
            SELECT {ITEM_COLUMNS}, f.title AS feed_title, e.created_at AS engaged_at
            FROM {table} e
            JOIN items i ON i.id = e.item_id
            JOIN feeds f ON f.id = i.feed_id
            WHERE e.user_id = ? AND i.title LIKE ? ESCAPE '\'
            ORDER BY e.created_at DESC, e.rowid DESC
            LIMIT ? OFFSET ?
            "#
        );
        let rows = sqlx::query_as::<_, EngagedRow>(&query)
            .bind(user_id)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(PaginatedResult::new(
            rows.into_iter().map(EngagedItem::from).collect(),
            total,
            page,
        ))
    }

    async fn insert_pair(&self, sql: &str, user_id: i64, target: i64, what: &str) -> Result<bool> {
        let result = sqlx::query(sql)
            .bind(user_id)
            .bind(target)
            .execute(self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    SemaphoreError::NotFound(what.to_string())
                } else {
                    SemaphoreError::Database(e.to_string())
                }
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_pair(&self, sql: &str, user_id: i64, target: i64) -> Result<bool> {
        let result = sqlx::query(sql)
            .bind(user_id)
            .bind(target)
            .execute(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, sql: &str, item_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(item_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(count)
    }
}
