//! Database schema and migrations for Semaphore.
//!
//! Migrations are applied sequentially when the database is first opened or
//! upgraded. Timestamps are fixed-width UTC text with millisecond precision.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Feed catalog
    r#"
CREATE TABLE feeds (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    title           TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    link            TEXT NOT NULL DEFAULT '',
    feed_link       TEXT NOT NULL UNIQUE,
    image_url       TEXT,
    feed_type       TEXT NOT NULL DEFAULT 'website',
    feed_format     TEXT NOT NULL DEFAULT '',
    feed_version    TEXT NOT NULL DEFAULT '',
    language        TEXT,
    pub_date        TEXT,
    pub_updated     TEXT,
    added_by        INTEGER,
    follower_count  INTEGER NOT NULL DEFAULT 0,
    last_fetch_at   TEXT,
    last_failure    TEXT,
    last_failure_at TEXT,
    failure_count   INTEGER NOT NULL DEFAULT 0,
    version         INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX idx_feeds_last_fetch_at ON feeds(last_fetch_at);

-- Items: (feed_id, link) and (feed_id, guid) are alternate identity keys
CREATE TABLE items (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id     INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    title       TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    content     TEXT NOT NULL DEFAULT '',
    link        TEXT NOT NULL,
    guid        TEXT NOT NULL,
    pub_date    TEXT,
    pub_updated TEXT,
    image_url   TEXT,
    authors     TEXT NOT NULL DEFAULT '[]',    -- JSON array
    enclosures  TEXT NOT NULL DEFAULT '[]',    -- JSON array
    categories  TEXT NOT NULL DEFAULT '[]',    -- JSON array
    version     INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE(feed_id, link),
    UNIQUE(feed_id, guid)
);

CREATE INDEX idx_items_sort_date ON items(COALESCE(pub_date, updated_at) DESC, id DESC);
CREATE INDEX idx_items_created_at ON items(created_at);
"#,
    // v2: Walls and engagement
    r#"
CREATE TABLE walls (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    name        TEXT NOT NULL,
    is_primary  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX idx_walls_user_id ON walls(user_id);

CREATE TABLE wall_feeds (
    wall_id     INTEGER NOT NULL REFERENCES walls(id) ON DELETE CASCADE,
    feed_id     INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (wall_id, feed_id)
);

CREATE INDEX idx_wall_feeds_feed_id ON wall_feeds(feed_id);

CREATE TABLE liked_items (
    user_id     INTEGER NOT NULL,
    item_id     INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (user_id, item_id)
);

CREATE INDEX idx_liked_items_item_id ON liked_items(item_id);

CREATE TABLE saved_items (
    user_id     INTEGER NOT NULL,
    item_id     INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (user_id, item_id)
);

CREATE INDEX idx_saved_items_item_id ON saved_items(item_id);

CREATE TABLE feed_follows (
    user_id     INTEGER NOT NULL,
    feed_id     INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (user_id, feed_id)
);

CREATE INDEX idx_feed_follows_feed_id ON feed_follows(feed_id);
"#,
];
