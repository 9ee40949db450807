//! Test helpers for integration tests.
//!
//! Provides a scripted feed source, fixture builders and a local HTTP feed
//! server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header;
use axum::routing::get;
use axum::Router;

use semaphore::config::Config;
use semaphore::feed::{FeedContent, FeedFormat, FeedRepository, NewFeed, ParsedFeed, ParsedItem};
use semaphore::refresh::RefreshSettings;
use semaphore::wall::NewWall;
use semaphore::{Database, FeedSource, Result, SemaphoreError, WallRepository};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Feed source serving whatever payload a test registered for a URL.
#[derive(Default)]
pub struct ScriptedSource {
    feeds: Mutex<HashMap<String, ParsedFeed>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `feed` for `url` from now on.
    pub fn serve(&self, url: &str, feed: ParsedFeed) {
        self.feeds.lock().unwrap().insert(url.to_string(), feed);
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<ParsedFeed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SemaphoreError::Feed(format!("HTTP error: 404 for {url}")))
    }
}

/// An RSS feed with one item per `(link, hours ago)` pair.
pub fn rss_feed(title: &str, items: &[(&str, i64)]) -> ParsedFeed {
    let now = chrono::Utc::now();
    let mut feed = ParsedFeed::new(title, FeedFormat::Rss);
    feed.version = "2.0".to_string();
    for (link, hours_ago) in items {
        feed = feed.with_item(
            ParsedItem::new(format!("Post {link}"), *link)
                .with_guid(*link)
                .with_published(now - chrono::Duration::hours(*hours_ago)),
        );
    }
    feed
}

/// Settings for a scheduler that considers every feed stale.
pub fn refresh_settings() -> RefreshSettings {
    RefreshSettings {
        period: Duration::from_secs(3600),
        stale_after: Duration::ZERO,
        workers: 3,
        fetch_timeout: Duration::from_secs(2),
        max_items_per_feed: 200,
        statement_timeout: Duration::from_secs(3),
    }
}

/// Configuration for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pagination.cursor_secret = "integration-secret".to_string();
    config.refresher.allow_private_hosts = true;
    config.refresher.fetch_timeout_secs = 5;
    config
}

/// Create a feed row directly.
pub async fn create_feed(db: &Database, link: &str) -> i64 {
    FeedRepository::new(db.pool())
        .create(&NewFeed::new(link, FeedContent::default()))
        .await
        .unwrap()
        .id
}

/// Create a wall for `user_id` following `feed_ids`.
pub async fn create_wall(db: &Database, user_id: i64, feed_ids: &[i64]) -> i64 {
    let walls = WallRepository::new(db.pool());
    let wall = walls
        .create(&NewWall::new(user_id, "Main").primary())
        .await
        .unwrap();
    for feed_id in feed_ids {
        walls.add_feed(wall.id, *feed_id).await.unwrap();
    }
    wall.id
}

/// Serve `body` at `/feed.xml` on a local port.
pub async fn serve_feed(body: &'static str) -> SocketAddr {
    let app = Router::new()
        .route(
            "/feed.xml",
            get(move || async move { ([(header::CONTENT_TYPE, "application/rss+xml")], body) }),
        )
        .route(
            "/large.xml",
            get(|| async { "x".repeat(64 * 1024) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
