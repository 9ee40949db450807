//! Semaphore - feed ingestion and ranked wall listings
//!
//! Keeps a catalog of syndication feeds fresh in the background and serves
//! wall items in recency or hot order through stable cursor pagination.

pub mod config;
pub mod db;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod item;
pub mod logging;
pub mod pagination;
pub mod ranking;
pub mod refresh;
pub mod wall;

pub use config::Config;
pub use db::{Database, PaginatedResult, Pagination};
pub use engagement::{EngagedItem, EngagementRepository, ViewerFlags};
pub use error::{Result, SemaphoreError};
pub use feed::{Feed, FeedService, FeedSource, HttpFeedSource};
pub use item::{Item, ItemRepository, ItemService, NewItem, UpsertReport};
pub use pagination::{
    ItemListing, ItemPage, ListItemsRequest, MemoryCache, SessionCache, SortMode,
};
pub use ranking::{ItemScore, RankingEngine, ScoreParams};
pub use refresh::{BatchJobLock, RefreshScheduler};
pub use wall::{Wall, WallRepository};
