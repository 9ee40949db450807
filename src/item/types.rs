//! Item types for Semaphore.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::{Enclosure, Person};

/// A catalog item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    /// Item ID.
    pub id: i64,
    /// Owning feed.
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: String,
    pub guid: String,
    /// Publish time declared by the source.
    pub pub_date: Option<DateTime<Utc>>,
    /// Update time declared by the source.
    pub pub_updated: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub authors: Vec<Person>,
    pub enclosures: Vec<Enclosure>,
    pub categories: Vec<String>,
    /// Bumped on every content change.
    pub version: i64,
    /// First ingestion time.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Sort key for recency ordering.
    pub fn sort_date(&self) -> DateTime<Utc> {
        self.pub_date.unwrap_or(self.updated_at)
    }
}

/// Normalized item ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: String,
    pub guid: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub pub_updated: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub authors: Vec<Person>,
    pub enclosures: Vec<Enclosure>,
    pub categories: Vec<String>,
}

impl NewItem {
    /// Create an item with its identity keys.
    pub fn new(feed_id: i64, link: impl Into<String>, guid: impl Into<String>) -> Self {
        Self {
            feed_id,
            title: String::new(),
            description: String::new(),
            content: String::new(),
            link: link.into(),
            guid: guid.into(),
            pub_date: None,
            pub_updated: None,
            image_url: None,
            authors: Vec::new(),
            enclosures: Vec::new(),
            categories: Vec::new(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the publish time.
    pub fn with_pub_date(mut self, pub_date: DateTime<Utc>) -> Self {
        self.pub_date = Some(pub_date);
        self
    }
}

/// Outcome of a batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Rows created.
    pub inserted: u64,
    /// Existing rows whose content changed.
    pub updated: u64,
    /// Batch entries dropped because they collided with an earlier entry.
    pub collapsed: u64,
}
