//! Maps parsed feed entries to catalog items.

use tracing::debug;

use super::types::NewItem;
use crate::feed::{ParsedFeed, ParsedItem};

/// Normalize the entries of a parsed feed for `feed_id`.
///
/// Entries without a usable link are dropped. At most `max_items` items are
/// returned, in source order.
pub fn normalize_items(parsed: &ParsedFeed, feed_id: i64, max_items: usize) -> Vec<NewItem> {
    let mut items = Vec::with_capacity(parsed.items.len().min(max_items));
    let mut dropped = 0usize;

    for entry in &parsed.items {
        if items.len() >= max_items {
            break;
        }
        match normalize_item(entry, feed_id) {
            Some(item) => items.push(item),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(feed_id, dropped, "dropped entries without a usable link");
    }

    items
}

/// Normalize a single entry, or `None` if it has no usable identity.
pub fn normalize_item(entry: &ParsedItem, feed_id: i64) -> Option<NewItem> {
    let guid = non_empty(entry.guid.as_deref());

    let link = non_empty(entry.link.as_deref())
        .or_else(|| if entry.guid_is_permalink { guid } else { None })
        .or_else(|| {
            entry
                .alternate_links
                .iter()
                .find_map(|l| non_empty(Some(l.as_str())))
        })?;

    let guid = guid.unwrap_or(link);

    Some(NewItem {
        feed_id,
        title: entry.title.clone(),
        description: entry.description.clone(),
        content: entry.content.clone(),
        link: link.to_string(),
        guid: guid.to_string(),
        // Never defaulted: a missing publish time must not look recent
        pub_date: entry.published,
        pub_updated: entry.updated,
        image_url: entry.image_url.clone(),
        authors: entry.authors.clone(),
        enclosures: entry.enclosures.clone(),
        categories: entry.categories.clone(),
    })
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedFormat;
    use chrono::{TimeZone, Utc};

    fn entry() -> ParsedItem {
        ParsedItem {
            title: "Title".to_string(),
            description: "<b>desc</b>".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_link_and_guid_copied() {
        let published = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let e = ParsedItem::new("Title", "https://example.com/1")
            .with_guid("g-1")
            .with_published(published)
            .with_description("<b>desc</b>");

        let item = normalize_item(&e, 42).unwrap();
        assert_eq!(item.feed_id, 42);
        assert_eq!(item.link, "https://example.com/1");
        assert_eq!(item.guid, "g-1");
        assert_eq!(item.title, "Title");
        assert_eq!(item.description, "<b>desc</b>");
        assert_eq!(item.pub_date, Some(published));
    }

    #[test]
    fn test_missing_guid_falls_back_to_link() {
        let e = ParsedItem::new("Title", "https://example.com/1");
        let item = normalize_item(&e, 1).unwrap();
        assert_eq!(item.guid, "https://example.com/1");
    }

    #[test]
    fn test_permalink_guid_used_as_link() {
        let mut e = entry();
        e.guid = Some("https://example.com/p/9".to_string());
        e.guid_is_permalink = true;
        e.alternate_links = vec!["https://mirror.example.com/9".to_string()];

        let item = normalize_item(&e, 1).unwrap();
        assert_eq!(item.link, "https://example.com/p/9");
        assert_eq!(item.guid, "https://example.com/p/9");
    }

    #[test]
    fn test_non_permalink_guid_uses_alternate_link() {
        let mut e = entry();
        e.guid = Some("tag:example.com,2024:9".to_string());
        e.alternate_links = vec!["".to_string(), "https://example.com/alt".to_string()];

        let item = normalize_item(&e, 1).unwrap();
        assert_eq!(item.link, "https://example.com/alt");
        assert_eq!(item.guid, "tag:example.com,2024:9");
    }

    #[test]
    fn test_entry_without_link_is_dropped() {
        let mut e = entry();
        e.guid = Some("opaque-id".to_string());
        assert!(normalize_item(&e, 1).is_none());

        let mut blank = entry();
        blank.link = Some("   ".to_string());
        assert!(normalize_item(&blank, 1).is_none());
    }

    #[test]
    fn test_optional_fields_stay_empty() {
        let e = ParsedItem::new("Title", "https://example.com/1");
        let item = normalize_item(&e, 1).unwrap();
        assert!(item.pub_date.is_none());
        assert!(item.pub_updated.is_none());
        assert!(item.image_url.is_none());
        assert!(item.categories.is_empty());
    }

    #[test]
    fn test_normalize_items_skips_bad_entries_and_limits() {
        let parsed = ParsedFeed::new("Feed", FeedFormat::Rss)
            .with_item(ParsedItem::new("a", "https://example.com/a"))
            .with_item(entry())
            .with_item(ParsedItem::new("b", "https://example.com/b"))
            .with_item(ParsedItem::new("c", "https://example.com/c"));

        let items = normalize_items(&parsed, 5, 10);
        let links: Vec<&str> = items.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/c"
            ]
        );

        let limited = normalize_items(&parsed, 5, 2);
        assert_eq!(limited.len(), 2);
    }
}
