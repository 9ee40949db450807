//! Feed catalog for Semaphore.
//!
//! This module provides the feed source client, the feed repository, the
//! version-checked health transitions and the add-feed flow.

mod fetcher;
mod health;
mod repository;
mod service;
mod types;

pub use fetcher::{parse_feed, validate_url, FeedSource, HttpFeedSource};
pub use health::FeedHealthTracker;
pub use repository::FeedRepository;
pub use service::FeedService;
pub use types::{
    Enclosure, Feed, FeedContent, FeedFormat, NewFeed, ParsedFeed, ParsedItem, Person,
    DEFAULT_FEED_TYPE, MAX_FAILURE_LENGTH,
};
