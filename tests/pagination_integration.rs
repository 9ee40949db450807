//! Integration tests for wall listings over refreshed feeds.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{create_feed, create_wall, refresh_settings, rss_feed, test_config, ScriptedSource};
use semaphore::engagement::EngagementRepository;
use semaphore::refresh::{BatchJobLock, RefreshScheduler};
use semaphore::{Database, ItemListing, ItemPage, ListItemsRequest, MemoryCache, SortMode};

const FEED_A: &str = "https://a.example/feed.xml";
const FEED_B: &str = "https://b.example/feed.xml";

/// Two feeds, five items in total, refreshed once.
async fn setup() -> (Database, i64) {
    let db = Database::open_in_memory().await.unwrap();
    let feed_a = create_feed(&db, FEED_A).await;
    let feed_b = create_feed(&db, FEED_B).await;
    // Not on the wall
    create_feed(&db, "https://c.example/feed.xml").await;

    let source = Arc::new(ScriptedSource::new());
    source.serve(
        FEED_A,
        rss_feed(
            "A",
            &[("https://a.example/1", 1), ("https://a.example/3", 3), ("https://a.example/5", 5)],
        ),
    );
    source.serve(
        FEED_B,
        rss_feed("B", &[("https://b.example/2", 2), ("https://b.example/4", 4)]),
    );
    source.serve(
        "https://c.example/feed.xml",
        rss_feed("C", &[("https://c.example/0", 0)]),
    );

    let report = RefreshScheduler::new(db.clone(), source, BatchJobLock::new(), refresh_settings())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.refreshed, 3);

    let wall_id = create_wall(&db, 1, &[feed_a, feed_b]).await;
    (db, wall_id)
}

fn links(page: &ItemPage) -> Vec<String> {
    page.items.iter().map(|i| i.item.link.clone()).collect()
}

async fn walk(listing: &ItemListing, wall_id: i64, mode: SortMode, page_size: usize) -> Vec<ItemPage> {
    let mut pages = Vec::new();
    let mut request = ListItemsRequest::new(wall_id, mode).with_page_size(page_size);
    loop {
        let page = listing.list_items(&request).await.unwrap();
        let done = !page.has_more;
        request = request
            .with_after(&page.next_cursor)
            .with_session(&page.session_id);
        pages.push(page);
        if done {
            return pages;
        }
    }
}

#[tokio::test]
async fn test_new_walk_covers_wall_in_recency_order() {
    let (db, wall_id) = setup().await;
    let listing = ItemListing::from_config(db, Arc::new(MemoryCache::new(100)), &test_config());

    let pages = walk(&listing, wall_id, SortMode::New, 2).await;
    let all: Vec<String> = pages.iter().flat_map(links).collect();
    assert_eq!(
        all,
        vec![
            "https://a.example/1",
            "https://b.example/2",
            "https://a.example/3",
            "https://b.example/4",
            "https://a.example/5",
        ]
    );
    assert!(pages.iter().all(|p| p.session_id.is_empty()));
}

#[tokio::test]
async fn test_hot_walk_of_five_items() {
    let (db, wall_id) = setup().await;
    let config = test_config();
    let cache = Arc::new(MemoryCache::from_config(&config.pagination));
    let listing = ItemListing::from_config(db, cache, &config);

    let pages = walk(&listing, wall_id, SortMode::Hot, 2).await;
    let sizes: Vec<usize> = pages.iter().map(|p| p.items.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(
        pages.iter().map(|p| p.has_more).collect::<Vec<_>>(),
        vec![true, true, false]
    );
    assert!(pages.last().unwrap().next_cursor.is_empty());

    let all: HashSet<String> = pages.iter().flat_map(links).collect();
    assert_eq!(all.len(), 5);
    assert!(!all.contains("https://c.example/0"));
}

#[tokio::test]
async fn test_hot_pages_disjoint_while_likes_change() {
    let (db, wall_id) = setup().await;
    let listing = ItemListing::from_config(
        db.clone(),
        Arc::new(MemoryCache::new(100)),
        &test_config(),
    );

    let first = listing
        .list_items(&ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(2))
        .await
        .unwrap();

    // Other users pile onto the oldest item mid-walk
    let oldest = listing
        .list_items(&ListItemsRequest::new(wall_id, SortMode::New).with_page_size(5))
        .await
        .unwrap()
        .items
        .last()
        .map(|i| i.item.id)
        .unwrap();
    let engagement = EngagementRepository::new(db.pool());
    for user in 10..40 {
        engagement.like(user, oldest).await.unwrap();
        engagement.save(user, oldest).await.unwrap();
    }

    let second = listing
        .list_items(
            &ListItemsRequest::new(wall_id, SortMode::Hot)
                .with_page_size(2)
                .with_after(&first.next_cursor)
                .with_session(&first.session_id),
        )
        .await
        .unwrap();

    let page1: HashSet<i64> = first.items.iter().map(|i| i.item.id).collect();
    assert!(second.items.iter().all(|i| !page1.contains(&i.item.id)));
    assert!(!page1.contains(&oldest));
    assert!(second.items.iter().all(|i| i.item.id != oldest));
    assert_eq!(second.session_id, first.session_id);

    // Scores continue downward from page one
    let last_first = first.items.last().unwrap().score.unwrap();
    assert!(second
        .items
        .iter()
        .all(|i| i.score.unwrap() <= last_first));
}
