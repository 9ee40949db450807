//! Engagement types for Semaphore.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::item::Item;

/// An item a user liked or saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagedItem {
    #[serde(flatten)]
    pub item: Item,
    /// Title of the item's feed.
    pub feed_title: String,
    /// When the user liked or saved it.
    pub engaged_at: DateTime<Utc>,
}

/// A user's view of a set of items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewerFlags {
    pub liked: HashSet<i64>,
    pub saved: HashSet<i64>,
    /// Like counts; items without likes are absent.
    pub like_counts: HashMap<i64, i64>,
}

impl ViewerFlags {
    pub fn is_liked(&self, item_id: i64) -> bool {
        self.liked.contains(&item_id)
    }

    pub fn is_saved(&self, item_id: i64) -> bool {
        self.saved.contains(&item_id)
    }

    pub fn like_count(&self, item_id: i64) -> i64 {
        self.like_counts.get(&item_id).copied().unwrap_or(0)
    }
}
