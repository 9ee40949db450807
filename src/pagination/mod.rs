//! Cursor pagination for wall item listings.
//!
//! "new" pages by keyset over `(sort date, id)`; "hot" pages over a ranked
//! snapshot cached under a session key so that one walk sees one ordering.

mod cache;
mod cursor;
mod service;

pub use cache::{MemoryCache, SessionCache, SessionKey};
pub use cursor::{Cursor, CursorCodec, RecencyCursor, ScoreCursor};
pub use service::{ItemListing, ItemPage, ListItemsRequest, ListedItem, ListingSettings};

use serde::{Deserialize, Serialize};

use crate::SemaphoreError;

/// Listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Strict recency.
    New,
    /// Decayed popularity.
    Hot,
}

impl SortMode {
    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::New => "new",
            SortMode::Hot => "hot",
        }
    }
}

impl std::str::FromStr for SortMode {
    type Err = SemaphoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(SortMode::New),
            "hot" => Ok(SortMode::Hot),
            other => Err(SemaphoreError::Validation(format!(
                "sort mode must be 'new' or 'hot', got '{other}'"
            ))),
        }
    }
}
