//! Feed service for Semaphore.
//!
//! Adding a feed fetches it once up front, so a link that does not parse
//! never enters the catalog.

use std::time::Duration;

use tracing::{info, warn};

use super::fetcher::FeedSource;
use super::health::FeedHealthTracker;
use super::repository::FeedRepository;
use super::types::{Feed, FeedContent, NewFeed};
use crate::config::Config;
use crate::db::Database;
use crate::item::ItemService;
use crate::{Result, SemaphoreError};

/// Service for feed catalog operations.
pub struct FeedService<'a> {
    db: &'a Database,
    source: &'a dyn FeedSource,
    fetch_timeout: Duration,
    max_items: usize,
    statement_timeout: Duration,
}

impl<'a> FeedService<'a> {
    /// Create a new FeedService.
    pub fn new(db: &'a Database, source: &'a dyn FeedSource, config: &Config) -> Self {
        Self {
            db,
            source,
            fetch_timeout: config.refresher.fetch_timeout(),
            max_items: config.refresher.max_items_per_feed,
            statement_timeout: config.database.statement_timeout(),
        }
    }

    /// Add a feed by its fetch URL.
    ///
    /// Returns the existing feed when the link is already known, including
    /// when a concurrent request inserted it first. A new feed has its items
    /// ingested immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The link is not an http(s) URL
    /// - The feed cannot be fetched or parsed
    pub async fn add_feed(&self, feed_link: &str, added_by: Option<i64>) -> Result<Feed> {
        let feed_link = normalize_link(feed_link)?;
        let repo = FeedRepository::new(self.db.pool());

        if let Some(existing) = repo.get_by_feed_link(&feed_link).await? {
            return Ok(existing);
        }

        let parsed = self.source.fetch(&feed_link, self.fetch_timeout).await?;
        let content = FeedContent::from_parsed(&parsed);

        let mut new_feed = NewFeed::new(&feed_link, content.clone());
        if let Some(user_id) = added_by {
            new_feed = new_feed.with_added_by(user_id);
        }

        let feed = match repo.create(&new_feed).await {
            Ok(feed) => feed,
            Err(SemaphoreError::Duplicate(_)) => {
                return repo
                    .get_by_feed_link(&feed_link)
                    .await?
                    .ok_or_else(|| SemaphoreError::NotFound("feed".into()));
            }
            Err(e) => return Err(e),
        };

        let report = ItemService::new(self.db)
            .ingest(feed.id, &parsed, self.max_items, self.statement_timeout)
            .await?;
        info!(
            feed_id = feed.id,
            feed_link = %feed.feed_link,
            inserted = report.inserted,
            "added feed"
        );

        match FeedHealthTracker::new(self.db.pool())
            .record_success(&feed, &content)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(SemaphoreError::EditConflict) => {
                warn!(feed_id = feed.id, "feed changed while being added");
                repo.get_by_id(feed.id)
                    .await?
                    .ok_or_else(|| SemaphoreError::NotFound("feed".into()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Trim a feed link and require an absolute http(s) URL.
fn normalize_link(feed_link: &str) -> Result<String> {
    let trimmed = feed_link.trim();
    if trimmed.is_empty() {
        return Err(SemaphoreError::Validation("feed link must not be empty".into()));
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| SemaphoreError::Validation(format!("invalid feed link: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        scheme => Err(SemaphoreError::Validation(format!(
            "unsupported feed link scheme: {scheme}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedFormat, ParsedFeed, ParsedItem};
    use crate::item::ItemRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FeedSource for StaticSource {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<ParsedFeed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(SemaphoreError::Feed("failed to parse feed".into()));
            }
            let mut feed = ParsedFeed::new("Example", FeedFormat::Rss)
                .with_item(ParsedItem::new("one", "https://x.example/1"))
                .with_item(ParsedItem::new("two", "https://x.example/2"));
            feed.version = "2.0".into();
            Ok(feed)
        }
    }

    fn source() -> StaticSource {
        StaticSource {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_add_feed_ingests_items() {
        let db = Database::open_in_memory().await.unwrap();
        let source = source();
        let config = Config::default();
        let service = FeedService::new(&db, &source, &config);

        let feed = service
            .add_feed(" https://x.example/feed.xml ", Some(7))
            .await
            .unwrap();
        assert_eq!(feed.feed_link, "https://x.example/feed.xml");
        assert_eq!(feed.title, "Example");
        assert_eq!(feed.feed_format, "rss");
        assert_eq!(feed.added_by, Some(7));
        assert!(feed.last_fetch_at.is_some());
        assert_eq!(feed.version, 2);

        let count = ItemRepository::new(db.pool())
            .count_by_feed(feed.id)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_add_known_feed_returns_existing() {
        let db = Database::open_in_memory().await.unwrap();
        let source = source();
        let config = Config::default();
        let service = FeedService::new(&db, &source, &config);

        let first = service
            .add_feed("https://x.example/feed.xml", None)
            .await
            .unwrap();
        let second = service
            .add_feed("https://x.example/feed.xml", Some(3))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.added_by, None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_feed_rejects_bad_links() {
        let db = Database::open_in_memory().await.unwrap();
        let source = source();
        let config = Config::default();
        let service = FeedService::new(&db, &source, &config);

        for link in ["", "not a url", "ftp://x.example/feed"] {
            let result = service.add_feed(link, None).await;
            assert!(
                matches!(result, Err(SemaphoreError::Validation(_))),
                "{link}"
            );
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_add_unparseable_feed_creates_nothing() {
        let db = Database::open_in_memory().await.unwrap();
        let source = source();
        let config = Config::default();
        let service = FeedService::new(&db, &source, &config);

        let result = service.add_feed("https://x.example/broken", None).await;
        assert!(matches!(result, Err(SemaphoreError::Feed(_))));
        assert!(FeedRepository::new(db.pool())
            .list_all()
            .await
            .unwrap()
            .is_empty());
    }
}
