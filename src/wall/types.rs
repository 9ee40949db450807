//! Wall types for Semaphore.

use chrono::{DateTime, Utc};

/// A user's collection of followed feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Wall {
    /// Wall ID.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Display name.
    pub name: String,
    /// Whether this is the owner's default wall.
    pub is_primary: bool,
    /// When the wall was created.
    pub created_at: DateTime<Utc>,
}

/// New wall for creation.
#[derive(Debug, Clone)]
pub struct NewWall {
    pub user_id: i64,
    pub name: String,
    pub is_primary: bool,
}

impl NewWall {
    /// Create a new wall.
    pub fn new(user_id: i64, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            is_primary: false,
        }
    }

    /// Mark the wall as the owner's primary wall.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }
}
