//! Item service for Semaphore.

use std::time::Duration;

use tracing::debug;

use super::normalizer::normalize_items;
use super::repository::ItemRepository;
use super::types::{Item, NewItem, UpsertReport};
use crate::db::{with_timeout, Database};
use crate::feed::ParsedFeed;
use crate::{Result, SemaphoreError};

/// High-level item operations.
pub struct ItemService<'a> {
    db: &'a Database,
}

impl<'a> ItemService<'a> {
    /// Create a new ItemService with the given database reference.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Add one item, treating an existing identity as success.
    ///
    /// A concurrent insert of the same link or guid returns the row that won.
    pub async fn add_item(&self, item: &NewItem) -> Result<Item> {
        let repo = ItemRepository::new(self.db.pool());
        match repo.insert(item).await {
            Ok(created) => Ok(created),
            Err(SemaphoreError::Duplicate(_)) => {
                debug!(feed_id = item.feed_id, link = %item.link, "item already exists");
                repo.find_by_identity(item.feed_id, &item.link, &item.guid)
                    .await?
                    .ok_or_else(|| SemaphoreError::NotFound("item".into()))
            }
            Err(e) => Err(e),
        }
    }

    /// Normalize a parsed feed and merge its items into the catalog.
    ///
    /// The merge is bounded by `statement_timeout`.
    pub async fn ingest(
        &self,
        feed_id: i64,
        parsed: &ParsedFeed,
        max_items: usize,
        statement_timeout: Duration,
    ) -> Result<UpsertReport> {
        let items = normalize_items(parsed, feed_id, max_items);
        if items.is_empty() {
            return Ok(UpsertReport::default());
        }

        let repo = ItemRepository::new(self.db.pool());
        with_timeout(statement_timeout, "item upsert", repo.upsert_many(&items)).await
    }
}
