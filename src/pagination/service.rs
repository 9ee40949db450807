//! Paginated item listings.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::cache::{SessionCache, SessionKey};
use super::cursor::{Cursor, CursorCodec, RecencyCursor, ScoreCursor};
use super::SortMode;
use crate::config::Config;
use crate::db::{with_timeout, Database};
use crate::engagement::EngagementRepository;
use crate::item::{Item, ItemRepository};
use crate::ranking::{ItemScore, RankingEngine, ScoreParams};
use crate::wall::WallRepository;
use crate::{Result, SemaphoreError};

/// Limits and sizes used by [`ItemListing`].
#[derive(Debug, Clone)]
pub struct ListingSettings {
    /// Lifetime of a hot snapshot.
    pub session_ttl: Duration,
    /// Snapshot size for a walk that starts from scratch.
    pub snapshot_size: usize,
    /// Snapshot size when a walk resumes after its session expired.
    pub refresh_snapshot_size: usize,
    /// Bound on each session cache call.
    pub cache_timeout: Duration,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Bound on each storage call.
    pub statement_timeout: Duration,
}

impl ListingSettings {
    /// Build settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_ttl: config.pagination.session_ttl(),
            snapshot_size: config.pagination.snapshot_size,
            refresh_snapshot_size: config.pagination.refresh_snapshot_size,
            cache_timeout: config.pagination.cache_timeout(),
            default_page_size: config.pagination.default_page_size,
            max_page_size: config.pagination.max_page_size,
            statement_timeout: config.database.statement_timeout(),
        }
    }
}

/// A page request.
///
/// Empty `after` and `session_id` mean "first page" and "no session".
#[derive(Debug, Clone)]
pub struct ListItemsRequest {
    pub wall_id: i64,
    pub sort_mode: SortMode,
    pub after: String,
    pub session_id: String,
    /// Zero selects the default page size.
    pub page_size: usize,
    /// Viewer whose likes and saves are flagged on each item.
    pub user_id: Option<i64>,
}

impl ListItemsRequest {
    /// Request the first page of a wall.
    pub fn new(wall_id: i64, sort_mode: SortMode) -> Self {
        Self {
            wall_id,
            sort_mode,
            after: String::new(),
            session_id: String::new(),
            page_size: 0,
            user_id: None,
        }
    }

    /// Continue after a cursor returned by a previous page.
    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = after.into();
        self
    }

    /// Continue a hot session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Flag the viewer's likes and saves.
    pub fn for_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// A listed item with its engagement and, when listed hot, its snapshot score.
#[derive(Debug, Clone, Serialize)]
pub struct ListedItem {
    #[serde(flatten)]
    pub item: Item,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub like_count: i64,
    /// Always false without a viewer.
    pub is_liked: bool,
    pub is_saved: bool,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPage {
    pub items: Vec<ListedItem>,
    /// Empty on the last page.
    pub next_cursor: String,
    pub has_more: bool,
    /// Session to pass back for the next hot page. Empty for "new".
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

/// Serves wall listings in recency or hot order.
#[derive(Clone)]
pub struct ItemListing {
    db: Database,
    cache: Arc<dyn SessionCache>,
    codec: CursorCodec,
    settings: ListingSettings,
    params: ScoreParams,
    candidate_pool: usize,
}

impl ItemListing {
    /// Create a new listing service.
    pub fn new(
        db: Database,
        cache: Arc<dyn SessionCache>,
        codec: CursorCodec,
        settings: ListingSettings,
        params: ScoreParams,
        candidate_pool: usize,
    ) -> Self {
        Self {
            db,
            cache,
            codec,
            settings,
            params,
            candidate_pool,
        }
    }

    /// Create a listing service from the loaded configuration.
    pub fn from_config(db: Database, cache: Arc<dyn SessionCache>, config: &Config) -> Self {
        Self::new(
            db,
            cache,
            CursorCodec::new(&config.pagination.cursor_secret),
            ListingSettings::from_config(config),
            config.ranking.score_params(),
            config.ranking.candidate_pool,
        )
    }

    /// Serve one page.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The page size exceeds the maximum (`Validation`)
    /// - The wall does not exist (`NotFound`)
    /// - The cursor or session id was not issued for this walk
    ///   (`InvalidCursor`, `InvalidSession`)
    pub async fn list_items(&self, request: &ListItemsRequest) -> Result<ItemPage> {
        let page_size = self.page_size(request.page_size)?;

        let wall = with_timeout(
            self.settings.statement_timeout,
            "wall lookup",
            WallRepository::new(self.db.pool()).get_by_id(request.wall_id),
        )
        .await?;
        if wall.is_none() {
            return Err(SemaphoreError::NotFound("wall".into()));
        }

        match request.sort_mode {
            SortMode::New => self.list_new(request, page_size).await,
            SortMode::Hot => self.list_hot(request, page_size).await,
        }
    }

    fn page_size(&self, requested: usize) -> Result<usize> {
        if requested == 0 {
            // An empty page with has_more set would stall the walk
            return Ok(self.settings.default_page_size.max(1));
        }
        if requested > self.settings.max_page_size {
            return Err(SemaphoreError::Validation(format!(
                "page size must be at most {}",
                self.settings.max_page_size
            )));
        }
        Ok(requested)
    }

    async fn list_new(&self, request: &ListItemsRequest, page_size: usize) -> Result<ItemPage> {
        let after = if request.after.is_empty() {
            None
        } else {
            match self.codec.decode(&request.after, SortMode::New)? {
                Cursor::New(c) => Some((c.sort_date, c.item_id)),
                Cursor::Hot(_) => return Err(SemaphoreError::InvalidCursor),
            }
        };

        let repo = ItemRepository::new(self.db.pool());
        let mut items = with_timeout(
            self.settings.statement_timeout,
            "recent items",
            repo.list_recent_for_wall(request.wall_id, after, page_size + 1),
        )
        .await?;

        let has_more = items.len() > page_size;
        items.truncate(page_size);

        let next_cursor = match items.last() {
            Some(last) if has_more => self.codec.encode(&Cursor::New(RecencyCursor {
                sort_date: last.sort_date(),
                item_id: last.id,
            }))?,
            _ => String::new(),
        };

        let items = self
            .annotate(request.user_id, items.into_iter().map(|i| (i, None)).collect())
            .await?;

        Ok(ItemPage {
            items,
            next_cursor,
            has_more,
            session_id: String::new(),
        })
    }

    async fn list_hot(&self, request: &ListItemsRequest, page_size: usize) -> Result<ItemPage> {
        let cursor = if request.after.is_empty() {
            None
        } else {
            match self.codec.decode(&request.after, SortMode::Hot)? {
                Cursor::Hot(c) => Some(c),
                Cursor::New(_) => return Err(SemaphoreError::InvalidCursor),
            }
        };

        let session = if request.session_id.is_empty() {
            None
        } else {
            Some(SessionKey::decode(
                &request.session_id,
                request.wall_id,
                SortMode::Hot,
            )?)
        };

        let cached = match &session {
            Some(key) => self.load_snapshot(key).await,
            None => None,
        };

        let (key, snapshot) = match (session, cached) {
            (Some(key), Some(snapshot)) => (key, snapshot),
            (resumed, _) => {
                // A walk already under way only needs the top of a new ranking
                let size = if resumed.is_some() || cursor.is_some() {
                    self.settings.refresh_snapshot_size
                } else {
                    self.settings.snapshot_size
                };
                let now = Utc::now();
                let engine = RankingEngine::new(self.db.pool(), self.params, self.candidate_pool);
                let snapshot = with_timeout(
                    self.settings.statement_timeout,
                    "ranking snapshot",
                    engine.snapshot(request.wall_id, size, now),
                )
                .await?;

                let key = SessionKey::generate(request.wall_id, SortMode::Hot, now);
                self.store_snapshot(&key, &snapshot).await;
                (key, snapshot)
            }
        };

        let start = cursor
            .map(|c| position_after(&snapshot, &c))
            .unwrap_or(0)
            .min(snapshot.len());
        let end = (start + page_size).min(snapshot.len());
        let page = &snapshot[start..end];
        let has_more = end < snapshot.len();

        let next_cursor = match page.last() {
            Some(last) if has_more => self.codec.encode(&Cursor::Hot(ScoreCursor {
                score: last.score,
                item_id: last.item_id,
            }))?,
            _ => String::new(),
        };

        let items = self.hydrate(page).await?;
        let items = self.annotate(request.user_id, items).await?;

        Ok(ItemPage {
            items,
            next_cursor,
            has_more,
            session_id: key.encode(),
        })
    }

    /// Load items for a snapshot slice, in snapshot order.
    ///
    /// Items deleted since the snapshot was taken are skipped.
    async fn hydrate(&self, page: &[ItemScore]) -> Result<Vec<(Item, Option<f64>)>> {
        let ids: Vec<i64> = page.iter().map(|s| s.item_id).collect();
        let repo = ItemRepository::new(self.db.pool());
        let loaded = with_timeout(
            self.settings.statement_timeout,
            "item hydration",
            repo.get_by_ids(&ids),
        )
        .await?;

        let mut by_id: HashMap<i64, Item> = loaded.into_iter().map(|i| (i.id, i)).collect();
        Ok(page
            .iter()
            .filter_map(|s| by_id.remove(&s.item_id).map(|item| (item, Some(s.score))))
            .collect())
    }

    /// Attach like counts and the viewer's flags to a page.
    async fn annotate(
        &self,
        user_id: Option<i64>,
        page: Vec<(Item, Option<f64>)>,
    ) -> Result<Vec<ListedItem>> {
        let ids: Vec<i64> = page.iter().map(|(item, _)| item.id).collect();
        let flags = with_timeout(
            self.settings.statement_timeout,
            "viewer flags",
            EngagementRepository::new(self.db.pool()).viewer_flags(user_id, &ids),
        )
        .await?;

        Ok(page
            .into_iter()
            .map(|(item, score)| ListedItem {
                like_count: flags.like_count(item.id),
                is_liked: flags.is_liked(item.id),
                is_saved: flags.is_saved(item.id),
                item,
                score,
            })
            .collect())
    }

    /// Read a snapshot. Every failure counts as a miss.
    async fn load_snapshot(&self, key: &SessionKey) -> Option<Vec<ItemScore>> {
        let bytes = match tokio::time::timeout(
            self.settings.cache_timeout,
            self.cache.get(key.as_str()),
        )
        .await
        {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                debug!(session = key.as_str(), "session expired");
                return None;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "session cache read failed");
                return None;
            }
            Err(_) => {
                warn!("session cache read timed out");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, session = key.as_str(), "discarding corrupt snapshot");
                None
            }
        }
    }

    /// Store a snapshot. A failed write only costs the next page a re-rank.
    async fn store_snapshot(&self, key: &SessionKey, snapshot: &[ItemScore]) {
        let bytes = match serde_json::to_vec(snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize snapshot");
                return;
            }
        };

        match tokio::time::timeout(
            self.settings.cache_timeout,
            self.cache.set(key.as_str(), bytes, self.settings.session_ttl),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "session cache write failed"),
            Err(_) => warn!("session cache write timed out"),
        }
    }
}

impl std::fmt::Debug for ItemListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemListing")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Index of the first snapshot entry after `cursor`.
///
/// When the cursor's item is not in the snapshot (a re-ranked session), the
/// walk resumes at the first entry that ranks below the cursor's key.
fn position_after(snapshot: &[ItemScore], cursor: &ScoreCursor) -> usize {
    if let Some(i) = snapshot.iter().position(|s| s.item_id == cursor.item_id) {
        return i + 1;
    }

    let target = ItemScore {
        item_id: cursor.item_id,
        score: cursor.score,
    };
    snapshot.partition_point(|s| s.rank_cmp(&target) != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::EngagementRepository;
    use crate::feed::{FeedContent, FeedRepository, NewFeed};
    use crate::item::NewItem;
    use crate::pagination::MemoryCache;
    use crate::wall::NewWall;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FailingCache;

    #[async_trait]
    impl SessionCache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(SemaphoreError::Cache("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            Err(SemaphoreError::Cache("connection refused".into()))
        }
    }

    fn settings() -> ListingSettings {
        ListingSettings {
            session_ttl: Duration::from_secs(600),
            snapshot_size: 300,
            refresh_snapshot_size: 100,
            cache_timeout: Duration::from_millis(500),
            default_page_size: 16,
            max_page_size: 100,
            statement_timeout: Duration::from_secs(3),
        }
    }

    fn listing(db: &Database, cache: Arc<dyn SessionCache>, settings: ListingSettings) -> ItemListing {
        ItemListing::new(
            db.clone(),
            cache,
            CursorCodec::new("test-secret"),
            settings,
            ScoreParams::default(),
            3000,
        )
    }

    /// A wall with `n` items, item k published k hours ago.
    async fn setup(n: i64) -> (Database, i64, Vec<i64>) {
        let db = Database::open_in_memory().await.unwrap();
        let feed = FeedRepository::new(db.pool())
            .create(&NewFeed::new("https://x.example/feed.xml", FeedContent::default()))
            .await
            .unwrap();
        let walls = WallRepository::new(db.pool());
        let wall = walls.create(&NewWall::new(1, "Main")).await.unwrap();
        walls.add_feed(wall.id, feed.id).await.unwrap();

        let repo = ItemRepository::new(db.pool());
        let now = Utc::now();
        let mut ids = Vec::new();
        for k in 0..n {
            let item = repo
                .insert(
                    &NewItem::new(feed.id, format!("https://x.example/{k}"), format!("g{k}"))
                        .with_pub_date(now - chrono::Duration::hours(k + 1)),
                )
                .await
                .unwrap();
            ids.push(item.id);
        }
        (db, wall.id, ids)
    }

    fn ids(page: &ItemPage) -> Vec<i64> {
        page.items.iter().map(|i| i.item.id).collect()
    }

    #[tokio::test]
    async fn test_new_mode_keyset_pages() {
        let (db, wall_id, item_ids) = setup(5).await;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        let mut request = ListItemsRequest::new(wall_id, SortMode::New).with_page_size(2);
        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        loop {
            let page = listing.list_items(&request).await.unwrap();
            assert!(page.session_id.is_empty());
            assert!(page.items.iter().all(|i| i.score.is_none()));
            sizes.push(page.items.len());
            seen.extend(ids(&page));
            if !page.has_more {
                assert!(page.next_cursor.is_empty());
                break;
            }
            request = request.with_after(page.next_cursor);
        }

        assert_eq!(sizes, vec![2, 2, 1]);
        // Newest first
        assert_eq!(seen, item_ids);
    }

    #[tokio::test]
    async fn test_new_mode_ignores_concurrent_inserts() {
        let (db, wall_id, item_ids) = setup(4).await;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        let first = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::New).with_page_size(2))
            .await
            .unwrap();

        // Newer than everything already paged past
        let feed_id = FeedRepository::new(db.pool()).list_all().await.unwrap()[0].id;
        ItemRepository::new(db.pool())
            .insert(&NewItem::new(feed_id, "https://x.example/fresh", "fresh").with_pub_date(Utc::now()))
            .await
            .unwrap();

        let second = listing
            .list_items(
                &ListItemsRequest::new(wall_id, SortMode::New)
                    .with_page_size(2)
                    .with_after(first.next_cursor),
            )
            .await
            .unwrap();
        assert_eq!(ids(&second), item_ids[2..4].to_vec());
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_hot_mode_pages_five_items() {
        let (db, wall_id, item_ids) = setup(5).await;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        let mut request = ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(2);
        let mut pages = Vec::new();
        loop {
            let page = listing.list_items(&request).await.unwrap();
            assert!(!page.session_id.is_empty());
            let has_more = page.has_more;
            let next = page.next_cursor.clone();
            let session = page.session_id.clone();
            pages.push(page);
            if !has_more {
                break;
            }
            request = request.with_after(next).with_session(session);
        }

        let sizes: Vec<usize> = pages.iter().map(|p| p.items.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(
            pages.iter().map(|p| p.has_more).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        assert!(pages.iter().all(|p| p.session_id == pages[0].session_id));

        // Equal engagement: newer items rank higher
        let seen: Vec<i64> = pages.iter().flat_map(ids).collect();
        assert_eq!(seen, item_ids);

        // Scores come back in snapshot order
        let scores: Vec<f64> = pages
            .iter()
            .flat_map(|p| p.items.iter().map(|i| i.score.unwrap()))
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_hot_session_is_stable_under_engagement_changes() {
        let (db, wall_id, item_ids) = setup(5).await;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        let first = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(2))
            .await
            .unwrap();
        assert_eq!(ids(&first), item_ids[0..2].to_vec());

        // Push the oldest item to the top of any fresh ranking
        let engagement = EngagementRepository::new(db.pool());
        let oldest = item_ids[4];
        for user in 1..=50 {
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
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(ids(&second), item_ids[2..4].to_vec());

        let third = listing
            .list_items(
                &ListItemsRequest::new(wall_id, SortMode::Hot)
                    .with_page_size(2)
                    .with_after(&second.next_cursor)
                    .with_session(&second.session_id),
            )
            .await
            .unwrap();
        assert_eq!(ids(&third), vec![oldest]);
        assert!(!third.has_more);

        // A new walk sees the new ranking
        let fresh = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(2))
            .await
            .unwrap();
        assert_ne!(fresh.session_id, first.session_id);
        assert_eq!(ids(&fresh)[0], oldest);
    }

    #[tokio::test]
    async fn test_expired_session_mints_new_one() {
        let (db, wall_id, _) = setup(4).await;
        let mut settings = settings();
        settings.session_ttl = Duration::from_millis(50);
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings);

        let first = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let second = listing
            .list_items(
                &ListItemsRequest::new(wall_id, SortMode::Hot)
                    .with_page_size(2)
                    .with_after(&first.next_cursor)
                    .with_session(&first.session_id),
            )
            .await
            .unwrap();

        assert!(!second.session_id.is_empty());
        assert_ne!(second.session_id, first.session_id);
        let first_ids: HashSet<i64> = ids(&first).into_iter().collect();
        assert_eq!(second.items.len(), 2);
        assert!(ids(&second).iter().all(|id| !first_ids.contains(id)));
    }

    #[tokio::test]
    async fn test_failing_cache_falls_back_to_ranking() {
        let (db, wall_id, item_ids) = setup(3).await;
        let listing = listing(&db, Arc::new(FailingCache), settings());

        let first = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(2))
            .await
            .unwrap();
        assert_eq!(ids(&first), item_ids[0..2].to_vec());
        assert!(first.has_more);

        let second = listing
            .list_items(
                &ListItemsRequest::new(wall_id, SortMode::Hot)
                    .with_page_size(2)
                    .with_after(&first.next_cursor)
                    .with_session(&first.session_id),
            )
            .await
            .unwrap();
        assert_eq!(ids(&second), vec![item_ids[2]]);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_a_miss() {
        let (db, wall_id, item_ids) = setup(2).await;
        let cache = Arc::new(MemoryCache::new(10));
        let listing = listing(&db, cache.clone(), settings());

        let first = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(1))
            .await
            .unwrap();
        let key = SessionKey::decode(&first.session_id, wall_id, SortMode::Hot).unwrap();
        cache
            .set(key.as_str(), b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let second = listing
            .list_items(
                &ListItemsRequest::new(wall_id, SortMode::Hot)
                    .with_page_size(1)
                    .with_after(&first.next_cursor)
                    .with_session(&first.session_id),
            )
            .await
            .unwrap();
        assert_eq!(ids(&second), vec![item_ids[1]]);
        assert_ne!(second.session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_rejects_foreign_tokens() {
        let (db, wall_id, _) = setup(3).await;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        let garbage = ListItemsRequest::new(wall_id, SortMode::Hot).with_after("garbage");
        assert!(matches!(
            listing.list_items(&garbage).await,
            Err(SemaphoreError::InvalidCursor)
        ));

        // A "new" cursor cannot continue a hot walk
        let new_page = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::New).with_page_size(1))
            .await
            .unwrap();
        let crossed = ListItemsRequest::new(wall_id, SortMode::Hot).with_after(&new_page.next_cursor);
        assert!(matches!(
            listing.list_items(&crossed).await,
            Err(SemaphoreError::InvalidCursor)
        ));

        // Tokens minted under another secret
        let other = ItemListing::new(
            db.clone(),
            Arc::new(MemoryCache::new(10)),
            CursorCodec::new("another-secret"),
            settings(),
            ScoreParams::default(),
            3000,
        );
        let forged = ListItemsRequest::new(wall_id, SortMode::New).with_after(&new_page.next_cursor);
        assert!(matches!(
            other.list_items(&forged).await,
            Err(SemaphoreError::InvalidCursor)
        ));

        let bad_session = ListItemsRequest::new(wall_id, SortMode::Hot).with_session("!!!");
        assert!(matches!(
            listing.list_items(&bad_session).await,
            Err(SemaphoreError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_session_bound_to_wall() {
        let (db, wall_id, _) = setup(3).await;
        let other_wall = WallRepository::new(db.pool())
            .create(&NewWall::new(2, "Other"))
            .await
            .unwrap();
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        let page = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::Hot).with_page_size(1))
            .await
            .unwrap();
        let request = ListItemsRequest::new(other_wall.id, SortMode::Hot).with_session(&page.session_id);
        assert!(matches!(
            listing.list_items(&request).await,
            Err(SemaphoreError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_page_size_limits() {
        let (db, wall_id, _) = setup(20).await;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        let page = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::New))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 16);
        assert!(page.has_more);

        let too_big = ListItemsRequest::new(wall_id, SortMode::New).with_page_size(101);
        let err = listing.list_items(&too_big).await.unwrap_err();
        assert!(matches!(err, SemaphoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_zero_default_page_size_still_advances() {
        let (db, wall_id, item_ids) = setup(2).await;
        let mut settings = settings();
        settings.default_page_size = 0;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings);

        let first = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::New))
            .await
            .unwrap();
        assert_eq!(ids(&first), vec![item_ids[0]]);
        assert!(first.has_more);
        assert!(!first.next_cursor.is_empty());

        let second = listing
            .list_items(&ListItemsRequest::new(wall_id, SortMode::New).with_after(&first.next_cursor))
            .await
            .unwrap();
        assert_eq!(ids(&second), vec![item_ids[1]]);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_missing_wall() {
        let (db, _, _) = setup(1).await;
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        for mode in [SortMode::New, SortMode::Hot] {
            let err = listing
                .list_items(&ListItemsRequest::new(9999, mode))
                .await
                .unwrap_err();
            assert!(matches!(err, SemaphoreError::NotFound(ref what) if what == "wall"));
        }
    }

    #[tokio::test]
    async fn test_empty_wall() {
        let db = Database::open_in_memory().await.unwrap();
        let wall = WallRepository::new(db.pool())
            .create(&NewWall::new(1, "Empty"))
            .await
            .unwrap();
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        for mode in [SortMode::New, SortMode::Hot] {
            let page = listing
                .list_items(&ListItemsRequest::new(wall.id, mode))
                .await
                .unwrap();
            assert!(page.items.is_empty());
            assert!(!page.has_more);
            assert!(page.next_cursor.is_empty());
        }
    }

    #[test]
    fn test_position_after_missing_item() {
        let snapshot = vec![
            ItemScore { item_id: 5, score: 3.0 },
            ItemScore { item_id: 4, score: 2.0 },
            ItemScore { item_id: 3, score: 1.0 },
        ];
        let present = ScoreCursor { score: 2.0, item_id: 4 };
        assert_eq!(position_after(&snapshot, &present), 2);

        let between = ScoreCursor { score: 2.5, item_id: 9 };
        assert_eq!(position_after(&snapshot, &between), 1);

        let past_end = ScoreCursor { score: 0.5, item_id: 1 };
        assert_eq!(position_after(&snapshot, &past_end), 3);
    }

    #[tokio::test]
    async fn test_items_carry_viewer_flags() {
        let (db, wall_id, item_ids) = setup(3).await;
        let engagement = EngagementRepository::new(db.pool());
        engagement.like(7, item_ids[0]).await.unwrap();
        engagement.like(8, item_ids[0]).await.unwrap();
        engagement.save(7, item_ids[1]).await.unwrap();
        let listing = listing(&db, Arc::new(MemoryCache::new(10)), settings());

        for mode in [SortMode::New, SortMode::Hot] {
            let page = listing
                .list_items(&ListItemsRequest::new(wall_id, mode).for_user(7))
                .await
                .unwrap();
            let flags: HashMap<i64, (i64, bool, bool)> = page
                .items
                .iter()
                .map(|i| (i.item.id, (i.like_count, i.is_liked, i.is_saved)))
                .collect();
            assert_eq!(flags[&item_ids[0]], (2, true, false), "{mode:?}");
            assert_eq!(flags[&item_ids[1]], (0, false, true), "{mode:?}");
            assert_eq!(flags[&item_ids[2]], (0, false, false), "{mode:?}");

            // Without a viewer only counts are filled
            let anonymous = listing
                .list_items(&ListItemsRequest::new(wall_id, mode))
                .await
                .unwrap();
            assert!(anonymous.items.iter().all(|i| !i.is_liked && !i.is_saved));
            let counts: i64 = anonymous.items.iter().map(|i| i.like_count).sum();
            assert_eq!(counts, 2);
        }
    }

    #[test]
    fn test_listed_item_serializes_flags() {
        let now = Utc::now();
        let listed = ListedItem {
            item: Item {
                id: 3,
                feed_id: 1,
                title: "t".into(),
                description: String::new(),
                content: String::new(),
                link: "https://x.example/3".into(),
                guid: "g3".into(),
                pub_date: None,
                pub_updated: None,
                image_url: None,
                authors: Vec::new(),
                enclosures: Vec::new(),
                categories: Vec::new(),
                version: 1,
                created_at: now,
                updated_at: now,
            },
            score: None,
            like_count: 4,
            is_liked: true,
            is_saved: false,
        };
        let json = serde_json::to_value(&listed).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["like_count"], 4);
        assert_eq!(json["is_liked"], true);
        assert_eq!(json["is_saved"], false);
        assert!(json.get("score").is_none());
    }

    #[test]
    fn test_page_serializes_client_shape() {
        let page = ItemPage {
            items: Vec::new(),
            next_cursor: String::new(),
            has_more: false,
            session_id: "abc".into(),
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["sessionID"], "abc");
        assert_eq!(json["hasMore"], false);
        assert_eq!(json["nextCursor"], "");
    }
}
