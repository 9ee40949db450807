//! Wall repository for Semaphore.

use chrono::Utc;

use super::types::{NewWall, Wall};
use crate::db::{parse_datetime, DbPool};
use crate::{Result, SemaphoreError};

/// Row type for wall from database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct WallRow {
    id: i64,
    user_id: i64,
    name: String,
    is_primary: bool,
    created_at: String,
}

impl From<WallRow> for Wall {
    fn from(row: WallRow) -> Self {
        Wall {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            is_primary: row.is_primary,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Repository for walls and their feed membership.
pub struct WallRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> WallRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new wall.
    pub async fn create(&self, wall: &NewWall) -> Result<Wall> {
        if wall.name.trim().is_empty() {
            return Err(SemaphoreError::Validation(
                "wall name must not be empty".into(),
            ));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO walls (user_id, name, is_primary) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(wall.user_id)
        .bind(&wall.name)
        .bind(wall.is_primary)
        .fetch_one(self.pool)
        .await
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| SemaphoreError::NotFound("wall".into()))
    }

    /// Get a wall by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Wall>> {
        let row = sqlx::query_as::<_, WallRow>(
            "SELECT id, user_id, name, is_primary, created_at FROM walls WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(row.map(Wall::from))
    }

    /// List a user's walls, primary first.
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<Wall>> {
        let rows = sqlx::query_as::<_, WallRow>(
            r#"
            SELECT id, user_id, name, is_primary, created_at
            FROM walls
            WHERE user_id = ?
            ORDER BY is_primary DESC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Wall::from).collect())
    }

    /// Add a feed to a wall. Returns false if it was already there.
    pub async fn add_feed(&self, wall_id: i64, feed_id: i64) -> Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO wall_feeds (wall_id, feed_id) VALUES (?, ?)")
                .bind(wall_id)
                .bind(feed_id)
                .execute(self.pool)
                .await
                .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a feed from a wall. Returns false if it was not there.
    pub async fn remove_feed(&self, wall_id: i64, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM wall_feeds WHERE wall_id = ? AND feed_id = ?")
            .bind(wall_id)
            .bind(feed_id)
            .execute(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// List the feeds of a wall.
    pub async fn list_feed_ids(&self, wall_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT feed_id FROM wall_feeds WHERE wall_id = ? ORDER BY feed_id ASC",
        )
        .bind(wall_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(ids)
    }
}
