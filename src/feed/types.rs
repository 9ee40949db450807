//! Feed types for Semaphore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default feed type for newly discovered feeds.
pub const DEFAULT_FEED_TYPE: &str = "website";

/// Maximum stored length of a failure reason.
pub const MAX_FAILURE_LENGTH: usize = 1000;

/// A syndication feed known to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    /// Feed ID.
    pub id: i64,
    /// Feed title.
    pub title: String,
    /// Feed description.
    pub description: String,
    /// Human-facing site URL.
    pub link: String,
    /// Fetch URL. Unique across the catalog.
    pub feed_link: String,
    /// Feed image.
    pub image_url: Option<String>,
    /// Kind of source (website, podcast, ...).
    pub feed_type: String,
    /// Syndication format (rss, atom, json).
    pub feed_format: String,
    /// Format version.
    pub feed_version: String,
    /// Declared language.
    pub language: Option<String>,
    /// Publish time declared by the feed.
    pub pub_date: Option<DateTime<Utc>>,
    /// Last update time declared by the feed.
    pub pub_updated: Option<DateTime<Utc>>,
    /// User who first added the feed.
    pub added_by: Option<i64>,
    /// Denormalized follower count.
    pub follower_count: i64,
    /// Last successful fetch.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Reason for the last failed fetch.
    pub last_failure: Option<String>,
    /// Time of the last failed fetch.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success.
    pub failure_count: i64,
    /// Optimistic concurrency version.
    pub version: i64,
    /// When the feed was created.
    pub created_at: DateTime<Utc>,
    /// When the feed was last written.
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    /// Latest of the last fetch and last failure times.
    ///
    /// `None` when the feed has never been checked.
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        match (self.last_fetch_at, self.last_failure_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Check if the feed is due for refresh at `now`.
    pub fn is_stale(&self, stale_after: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.last_checked_at() {
            None => true,
            Some(last) => last < now - stale_after,
        }
    }
}

/// Mutable feed content overwritten by every successful refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedContent {
    pub title: String,
    pub description: String,
    pub link: String,
    pub image_url: Option<String>,
    pub feed_format: String,
    pub feed_version: String,
    pub language: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub pub_updated: Option<DateTime<Utc>>,
}

impl FeedContent {
    /// Extract the stored content from a parsed feed.
    pub fn from_parsed(parsed: &ParsedFeed) -> Self {
        Self {
            title: parsed.title.clone(),
            description: parsed.description.clone(),
            link: parsed.link.clone(),
            image_url: parsed.image_url.clone(),
            feed_format: parsed.format.as_str().to_string(),
            feed_version: parsed.version.clone(),
            language: parsed.language.clone(),
            pub_date: parsed.pub_date,
            pub_updated: parsed.pub_updated,
        }
    }
}

/// New feed for creation.
#[derive(Debug, Clone)]
pub struct NewFeed {
    /// Fetch URL.
    pub feed_link: String,
    /// Kind of source.
    pub feed_type: String,
    /// User who added the feed.
    pub added_by: Option<i64>,
    /// Initial content.
    pub content: FeedContent,
}

impl NewFeed {
    /// Create a new feed record from its first parse.
    pub fn new(feed_link: impl Into<String>, content: FeedContent) -> Self {
        Self {
            feed_link: feed_link.into(),
            feed_type: DEFAULT_FEED_TYPE.to_string(),
            added_by: None,
            content,
        }
    }

    /// Set the user who added the feed.
    pub fn with_added_by(mut self, user_id: i64) -> Self {
        self.added_by = Some(user_id);
        self
    }

    /// Set the feed type.
    pub fn with_feed_type(mut self, feed_type: impl Into<String>) -> Self {
        self.feed_type = feed_type.into();
        self
    }
}

/// Syndication format of a parsed feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
    Json,
}

impl FeedFormat {
    /// Convert to the stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Rss => "rss",
            FeedFormat::Atom => "atom",
            FeedFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A media attachment of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// Parsed feed from a fetch.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    /// Human-facing site URL.
    pub link: String,
    /// Self link advertised by the feed, if any.
    pub feed_link: Option<String>,
    pub image_url: Option<String>,
    pub language: Option<String>,
    pub format: FeedFormat,
    pub version: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub pub_updated: Option<DateTime<Utc>>,
    pub items: Vec<ParsedItem>,
}

impl ParsedFeed {
    /// Create an empty parsed feed of the given format.
    pub fn new(title: impl Into<String>, format: FeedFormat) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            link: String::new(),
            feed_link: None,
            image_url: None,
            language: None,
            format,
            version: String::new(),
            pub_date: None,
            pub_updated: None,
            items: Vec::new(),
        }
    }

    /// Append an item.
    pub fn with_item(mut self, item: ParsedItem) -> Self {
        self.items.push(item);
        self
    }
}

/// Parsed item from a feed.
#[derive(Debug, Clone, Default)]
pub struct ParsedItem {
    pub title: String,
    pub description: String,
    pub content: String,
    /// The item's own link.
    pub link: Option<String>,
    /// Other links advertised for the item, in source order.
    pub alternate_links: Vec<String>,
    pub guid: Option<String>,
    /// Whether the guid is itself the item's permalink.
    pub guid_is_permalink: bool,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub authors: Vec<Person>,
    pub enclosures: Vec<Enclosure>,
    pub categories: Vec<String>,
    pub image_url: Option<String>,
}

impl ParsedItem {
    /// Create an item with a title and link.
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: Some(link.into()),
            ..Default::default()
        }
    }

    /// Set the guid.
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Set the publish time.
    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
