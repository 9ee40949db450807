//! Item repository for Semaphore.
//!
//! Batch ingestion goes through [`ItemRepository::upsert_many`], a set-based
//! merge keyed on the two alternate identities `(feed_id, link)` and
//! `(feed_id, guid)`.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use super::types::{Item, NewItem, UpsertReport};
use crate::db::{
    format_datetime, like_pattern, parse_datetime, DbPool, PaginatedResult, Pagination, SQL_NOW,
};
use crate::error::is_unique_violation;
use crate::ranking::ScoreInput;
use crate::{Result, SemaphoreError};

/// Rows per merge statement.
const UPSERT_CHUNK_SIZE: usize = 500;

/// Item columns, selected from `items i`.
pub(crate) const ITEM_COLUMNS: &str = "i.id, i.feed_id, i.title, i.description, i.content, i.link, i.guid, \
    i.pub_date, i.pub_updated, i.image_url, i.authors, i.enclosures, i.categories, i.version, \
    i.created_at, i.updated_at";

const INCOMING_COLUMNS: &str = "feed_id, title, description, content, link, guid, pub_date, \
    pub_updated, image_url, authors, enclosures, categories";

/// Row type for item from database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ItemRow {
    id: i64,
    feed_id: i64,
    title: String,
    description: String,
    content: String,
    link: String,
    guid: String,
    pub_date: Option<String>,
    pub_updated: Option<String>,
    image_url: Option<String>,
    authors: String,
    enclosures: String,
    categories: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            feed_id: row.feed_id,
            title: row.title,
            description: row.description,
            content: row.content,
            link: row.link,
            guid: row.guid,
            pub_date: row.pub_date.and_then(|s| parse_datetime(&s)),
            pub_updated: row.pub_updated.and_then(|s| parse_datetime(&s)),
            image_url: row.image_url,
            authors: serde_json::from_str(&row.authors).unwrap_or_default(),
            enclosures: serde_json::from_str(&row.enclosures).unwrap_or_default(),
            categories: serde_json::from_str(&row.categories).unwrap_or_default(),
            version: row.version,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for ranking inputs.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ScoreInputRow {
    id: i64,
    pub_date: Option<String>,
    created_at: String,
    likes: i64,
    saves: i64,
}

impl From<ScoreInputRow> for ScoreInput {
    fn from(row: ScoreInputRow) -> Self {
        let created_at = parse_datetime(&row.created_at).unwrap_or_else(Utc::now);
        // Age counts from the earlier of publish and ingestion time
        let published_at = row
            .pub_date
            .and_then(|s| parse_datetime(&s))
            .map_or(created_at, |p| p.min(created_at));
        ScoreInput {
            item_id: row.id,
            likes: row.likes,
            saves: row.saves,
            published_at,
        }
    }
}

/// Item encoded for binding.
struct EncodedItem<'a> {
    item: &'a NewItem,
    pub_date: Option<String>,
    pub_updated: Option<String>,
    authors: String,
    enclosures: String,
    categories: String,
}

impl<'a> EncodedItem<'a> {
    fn encode(item: &'a NewItem) -> Result<Self> {
        let json = |e: serde_json::Error| SemaphoreError::Database(format!("encode item: {e}"));
        Ok(Self {
            item,
            pub_date: item.pub_date.as_ref().map(format_datetime),
            pub_updated: item.pub_updated.as_ref().map(format_datetime),
            authors: serde_json::to_string(&item.authors).map_err(json)?,
            enclosures: serde_json::to_string(&item.enclosures).map_err(json)?,
            categories: serde_json::to_string(&item.categories).map_err(json)?,
        })
    }
}

/// Drop batch entries that collide with an earlier entry on either key.
///
/// The first occurrence wins. Returns the kept entries in order.
fn collapse_batch(items: &[NewItem]) -> Vec<&NewItem> {
    let mut links = HashSet::new();
    let mut guids = HashSet::new();
    let mut kept = Vec::with_capacity(items.len());

    for item in items {
        let link_key = (item.feed_id, item.link.as_str());
        let guid_key = (item.feed_id, item.guid.as_str());
        if links.contains(&link_key) || guids.contains(&guid_key) {
            continue;
        }
        links.insert(link_key);
        guids.insert(guid_key);
        kept.push(item);
    }

    kept
}

/// Pick which entries may write the existing rows they match.
///
/// `matches` pairs an entry's batch position with a row id it matches by
/// link or guid. Walking entries in batch order, an entry keeps its rows
/// unless an earlier entry already claimed one of them. Returns one flag per
/// entry.
fn claim_rows(entries: usize, matches: &[(i64, i64)]) -> Vec<bool> {
    let mut by_entry: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for &(ord, row_id) in matches {
        by_entry.entry(ord).or_default().push(row_id);
    }

    let mut keep = vec![true; entries];
    let mut claimed = HashSet::new();
    for (ord, rows) in by_entry {
        let Some(flag) = usize::try_from(ord).ok().and_then(|i| keep.get_mut(i)) else {
            continue;
        };
        if rows.iter().any(|id| claimed.contains(id)) {
            *flag = false;
        } else {
            claimed.extend(rows);
        }
    }
    keep
}

/// Start a statement with `WITH incoming(...) AS (VALUES ...)`.
fn incoming_builder<'q>(chunk: &'q [&'q EncodedItem<'q>]) -> QueryBuilder<'q, Sqlite> {
    let mut builder = QueryBuilder::new(format!("WITH incoming({INCOMING_COLUMNS}) AS ("));
    builder.push_values(chunk.iter().copied(), |mut b, e: &'q EncodedItem<'q>| {
        b.push_bind(e.item.feed_id)
            .push_bind(&e.item.title)
            .push_bind(&e.item.description)
            .push_bind(&e.item.content)
            .push_bind(&e.item.link)
            .push_bind(&e.item.guid)
            .push_bind(&e.pub_date)
            .push_bind(&e.pub_updated)
            .push_bind(&e.item.image_url)
            .push_bind(&e.authors)
            .push_bind(&e.enclosures)
            .push_bind(&e.categories);
    });
    builder.push(") ");
    builder
}

/// Select `(batch position, row id)` for every existing row an entry matches.
fn matches_builder<'q>(
    chunk: &'q [&'q EncodedItem<'q>],
    first_ord: usize,
) -> QueryBuilder<'q, Sqlite> {
    let mut builder = QueryBuilder::new("WITH incoming(ord, feed_id, link, guid) AS (");
    builder.push_values(
        chunk.iter().copied().enumerate(),
        |mut b, (n, e): (usize, &'q EncodedItem<'q>)| {
            b.push_bind((first_ord + n) as i64)
                .push_bind(e.item.feed_id)
                .push_bind(&e.item.link)
                .push_bind(&e.item.guid);
        },
    );
    builder.push(
        r#")
        SELECT incoming.ord, i.id FROM incoming
        JOIN items i ON i.feed_id = incoming.feed_id
            AND (i.link = incoming.link OR i.guid = incoming.guid)
        "#,
    );
    builder
}

/// Repository for item operations.
pub struct ItemRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ItemRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Merge a batch of normalized items into the catalog.
    ///
    /// Entries matching no existing row on either key are inserted; rows
    /// matched by link or guid are overwritten and versioned, but only when
    /// their content actually differs. Matching is decided against the
    /// catalog as it was before the batch, so one batch never yields two rows
    /// for the same identity. When several entries match the same row, the
    /// earliest entry writes it and the rest count as collapsed. Runs in one
    /// transaction.
    pub async fn upsert_many(&self, items: &[NewItem]) -> Result<UpsertReport> {
        let kept = collapse_batch(items);
        let mut report = UpsertReport {
            collapsed: (items.len() - kept.len()) as u64,
            ..Default::default()
        };
        if kept.is_empty() {
            return Ok(report);
        }

        let encoded = kept
            .into_iter()
            .map(EncodedItem::encode)
            .collect::<Result<Vec<_>>>()?;
        let entries: Vec<&EncodedItem<'_>> = encoded.iter().collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        for chunk in entries.chunks(UPSERT_CHUNK_SIZE) {
            // Insert first: the NOT EXISTS check sees the pre-batch catalog
            let mut insert = incoming_builder(chunk);
            insert.push(format!(
                r#"
                INSERT OR IGNORE INTO items ({INCOMING_COLUMNS})
                SELECT {INCOMING_COLUMNS} FROM incoming
                WHERE NOT EXISTS (
                    SELECT 1 FROM items i
                    WHERE i.feed_id = incoming.feed_id
                      AND (i.link = incoming.link OR i.guid = incoming.guid)
                )
                "#
            ));
            let inserted = insert
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| SemaphoreError::Database(e.to_string()))?;
            report.inserted += inserted.rows_affected();
        }

        let mut matches = Vec::new();
        for (n, chunk) in entries.chunks(UPSERT_CHUNK_SIZE).enumerate() {
            let rows: Vec<(i64, i64)> = matches_builder(chunk, n * UPSERT_CHUNK_SIZE)
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| SemaphoreError::Database(e.to_string()))?;
            matches.extend(rows);
        }

        let keep = claim_rows(entries.len(), &matches);
        let writers: Vec<&EncodedItem<'_>> = entries
            .iter()
            .zip(&keep)
            .filter_map(|(e, kept)| kept.then_some(*e))
            .collect();
        report.collapsed += (entries.len() - writers.len()) as u64;

        for chunk in writers.chunks(UPSERT_CHUNK_SIZE) {
            // Rows just inserted match themselves with identical content and are skipped
            let mut update = incoming_builder(chunk);
            update.push(format!(
                r#"
                UPDATE OR IGNORE items
                SET title = incoming.title,
                    description = incoming.description,
                    content = incoming.content,
                    link = incoming.link,
                    guid = incoming.guid,
                    pub_date = incoming.pub_date,
                    pub_updated = incoming.pub_updated,
                    image_url = incoming.image_url,
                    authors = incoming.authors,
                    enclosures = incoming.enclosures,
                    categories = incoming.categories,
                    version = items.version + 1,
                    updated_at = {SQL_NOW}
                FROM incoming
                WHERE items.feed_id = incoming.feed_id
                  AND (items.link = incoming.link OR items.guid = incoming.guid)
                  AND (items.title IS NOT incoming.title
                       OR items.description IS NOT incoming.description
                       OR items.content IS NOT incoming.content
                       OR items.link IS NOT incoming.link
                       OR items.guid IS NOT incoming.guid
                       OR items.pub_date IS NOT incoming.pub_date
                       OR items.pub_updated IS NOT incoming.pub_updated
                       OR items.image_url IS NOT incoming.image_url
                       OR items.authors IS NOT incoming.authors
                       OR items.enclosures IS NOT incoming.enclosures
                       OR items.categories IS NOT incoming.categories)
                "#
            ));
            let updated = update
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| SemaphoreError::Database(e.to_string()))?;
            report.updated += updated.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(report)
    }

    /// Insert a single item.
    ///
    /// Returns `Duplicate` when the feed already has an item with the same
    /// link or guid.
    pub async fn insert(&self, item: &NewItem) -> Result<Item> {
        let encoded = EncodedItem::encode(item)?;
        let id: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO items ({INCOMING_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id"
        ))
        .bind(item.feed_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.content)
        .bind(&item.link)
        .bind(&item.guid)
        .bind(&encoded.pub_date)
        .bind(&encoded.pub_updated)
        .bind(&item.image_url)
        .bind(&encoded.authors)
        .bind(&encoded.enclosures)
        .bind(&encoded.categories)
        .fetch_one(self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SemaphoreError::Duplicate("item".into())
            } else {
                SemaphoreError::Database(e.to_string())
            }
        })?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| SemaphoreError::NotFound("item".into()))
    }

    /// Get an item by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Item>> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?");
        let row = sqlx::query_as::<_, ItemRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(row.map(Item::from))
    }

    /// Find the item of a feed matching either alternate key.
    pub async fn find_by_identity(
        &self,
        feed_id: i64,
        link: &str,
        guid: &str,
    ) -> Result<Option<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items i \
             WHERE i.feed_id = ? AND (i.link = ? OR i.guid = ?) \
             ORDER BY i.id ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, ItemRow>(&query)
            .bind(feed_id)
            .bind(link)
            .bind(guid)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(row.map(Item::from))
    }

    /// Get items by ID. Order is unspecified and missing IDs are skipped.
    pub async fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id IN ("));
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        query.push(")");

        let rows = query
            .build_query_as::<ItemRow>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// List items of a feed, newest first.
    pub async fn list_by_feed(&self, feed_id: i64) -> Result<Vec<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items i WHERE i.feed_id = ? \
             ORDER BY COALESCE(i.pub_date, i.updated_at) DESC, i.id DESC"
        );
        let rows = sqlx::query_as::<_, ItemRow>(&query)
            .bind(feed_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Count items of a feed.
    pub async fn count_by_feed(&self, feed_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(count)
    }

    /// Search items of the given feeds by title, newest first.
    ///
    /// An empty `title` matches every item. Matching is a substring match,
    /// case-insensitive for ASCII.
    pub async fn search_in_feeds(
        &self,
        feed_ids: &[i64],
        title: &str,
        page: Pagination,
    ) -> Result<PaginatedResult<Item>> {
        if feed_ids.is_empty() {
            return Ok(PaginatedResult::empty(page));
        }
        let (offset, limit) = page.bounds();
        let pattern = like_pattern(title);

        let filter = |query: &mut QueryBuilder<'_, Sqlite>| {
            query.push(" WHERE i.feed_id IN (");
            let mut separated = query.separated(", ");
            for id in feed_ids {
                separated.push_bind(*id);
            }
            query.push(") AND i.title LIKE ");
            query.push_bind(pattern.clone());
            query.push(" ESCAPE '\\'");
        };

        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM items i");
        filter(&mut count);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items i"));
        filter(&mut query);
        query.push(" ORDER BY COALESCE(i.pub_date, i.updated_at) DESC, i.id DESC LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows = query
            .build_query_as::<ItemRow>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(PaginatedResult::new(
            rows.into_iter().map(Item::from).collect(),
            total,
            page,
        ))
    }

    /// Keyset page of a wall's items in recency order.
    ///
    /// `after` is the `(sort date, id)` of the last item already seen.
    pub async fn list_recent_for_wall(
        &self,
        wall_id: i64,
        after: Option<(DateTime<Utc>, i64)>,
        limit: usize,
    ) -> Result<Vec<Item>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {ITEM_COLUMNS} FROM items i \
             JOIN wall_feeds wf ON wf.feed_id = i.feed_id \
             WHERE wf.wall_id = "
        ));
        query.push_bind(wall_id);

        if let Some((date, id)) = after {
            query.push(" AND (COALESCE(i.pub_date, i.updated_at), i.id) < (");
            query.push_bind(format_datetime(&date));
            query.push(", ");
            query.push_bind(id);
            query.push(")");
        }

        query.push(" ORDER BY COALESCE(i.pub_date, i.updated_at) DESC, i.id DESC LIMIT ");
        query.push_bind(limit as i64);

        let rows = query
            .build_query_as::<ItemRow>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Ranking inputs for the `limit` most recent items of a wall.
    pub async fn score_inputs_for_wall(&self, wall_id: i64, limit: usize) -> Result<Vec<ScoreInput>> {
        let rows = sqlx::query_as::<_, ScoreInputRow>(
            r#"
            SELECT i.id, i.pub_date, i.created_at,
                   (SELECT COUNT(*) FROM liked_items l WHERE l.item_id = i.id) AS likes,
                   (SELECT COUNT(*) FROM saved_items s WHERE s.item_id = i.id) AS saves
            FROM items i
            JOIN wall_feeds wf ON wf.feed_id = i.feed_id
            WHERE wf.wall_id = ?
            ORDER BY COALESCE(MIN(i.pub_date, i.created_at), i.created_at) DESC, i.id DESC
            LIMIT ?
            "#,
        )
        .bind(wall_id)
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(ScoreInput::from).collect())
    }

    /// Delete items first ingested before `cutoff`.
    ///
    /// Items saved by any user are kept regardless of age. Returns the number
    /// of items deleted.
    pub async fn delete_ingested_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM items
            WHERE created_at < ?
              AND NOT EXISTS (SELECT 1 FROM saved_items s WHERE s.item_id = items.id)
            "#,
        )
        .bind(format_datetime(&cutoff))
        .execute(self.pool)
        .await
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
