//! Delta resolution: which feed items are strictly newer than a cursor.

use chrono::{DateTime, Utc};

use super::cursor::{CursorPayload, MAX_CURSOR_IDS};
use crate::artifacts::parse_timestamp;

/// Anything with an id and a publication timestamp can be served as a delta.
pub trait DeltaItem {
    fn delta_id(&self) -> &str;
    fn delta_timestamp(&self) -> &str;
}

/// Result of [`resolve_delta`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delta<T> {
    /// Newest first, at most `limit`.
    pub items: Vec<T>,
    /// `None` only when there is no cursor and nothing to build one from.
    pub next_cursor: Option<CursorPayload>,
}

/// Whether an item is newer than what the cursor has already seen.
///
/// Unparseable timestamps on either side are never newer. At an equal
/// instant the item is newer only if its id is not in `cursor.ids`.
pub fn is_newer(item_timestamp: &str, item_id: &str, cursor: &CursorPayload) -> bool {
    let (Some(item_t), Some(cursor_t)) = (parse_timestamp(item_timestamp), parse_timestamp(&cursor.t))
    else {
        return false;
    };

    match item_t.cmp(&cursor_t) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => !cursor.ids.iter().any(|id| id == item_id),
    }
}

/// Select the items a polling client has not seen yet and the cursor to
/// send back.
///
/// `feed` must already be newest-first. Without a cursor every item is
/// eligible and the next cursor describes the newest item in the feed. With a
/// cursor only newer items are returned; the next cursor describes the newest
/// of those, or is the incoming cursor unchanged when there are none.
pub fn resolve_delta<T: DeltaItem + Clone>(
    feed: &[T],
    cursor: Option<&CursorPayload>,
    limit: usize,
) -> Delta<T> {
    match cursor {
        None => Delta {
            items: feed.iter().take(limit).cloned().collect(),
            next_cursor: cursor_for_newest(feed.iter(), feed),
        },
        Some(cursor) => {
            let fresh: Vec<&T> = feed
                .iter()
                .filter(|item| is_newer(item.delta_timestamp(), item.delta_id(), cursor))
                .collect();
            let next_cursor =
                cursor_for_newest(fresh.iter().copied(), feed).or_else(|| Some(cursor.clone()));
            Delta {
                items: fresh.into_iter().take(limit).cloned().collect(),
                next_cursor,
            }
        }
    }
}

/// Build a cursor at the newest timestamp among `candidates`.
///
/// The tie-break ids are every item in `feed` published at exactly that
/// instant, so items the client saw on an earlier poll stay marked as seen.
fn cursor_for_newest<'a, T: DeltaItem + 'a>(
    candidates: impl Iterator<Item = &'a T>,
    feed: &[T],
) -> Option<CursorPayload> {
    let (newest_t, newest_raw) = candidates
        .filter_map(|item| {
            parse_timestamp(item.delta_timestamp()).map(|t| (t, item.delta_timestamp()))
        })
        .max_by_key(|(t, _)| *t)?;

    let ids = ids_at(feed, newest_t);
    Some(CursorPayload::new(newest_raw, ids))
}

fn ids_at<T: DeltaItem>(feed: &[T], at: DateTime<Utc>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for item in feed {
        if parse_timestamp(item.delta_timestamp()) == Some(at)
            && !ids.iter().any(|id| id == item.delta_id())
        {
            ids.push(item.delta_id().to_string());
            if ids.len() == MAX_CURSOR_IDS {
                break;
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: &'static str,
        ts: &'static str,
    }

    impl DeltaItem for Item {
        fn delta_id(&self) -> &str {
            self.id
        }
        fn delta_timestamp(&self) -> &str {
            self.ts
        }
    }

    fn item(id: &'static str, ts: &'static str) -> Item {
        Item { id, ts }
    }

    fn cursor(t: &str, ids: &[&str]) -> CursorPayload {
        CursorPayload::new(t, ids.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_is_newer_by_timestamp() {
        let c = cursor("2026-03-01T12:00:00Z", &["a"]);
        assert!(is_newer("2026-03-01T12:00:01Z", "a", &c));
        assert!(!is_newer("2026-03-01T11:59:59Z", "zzz", &c));
    }

    #[test]
    fn test_is_newer_tie_break() {
        let c = cursor("2026-03-01T12:00:00Z", &["a", "b"]);
        assert!(!is_newer("2026-03-01T12:00:00Z", "a", &c));
        assert!(is_newer("2026-03-01T12:00:00Z", "c", &c));
        // Same instant, different textual form.
        assert!(!is_newer("2026-03-01T14:00:00+02:00", "b", &c));
    }

    #[test]
    fn test_is_newer_unparseable_is_not_new() {
        let c = cursor("2026-03-01T12:00:00Z", &[]);
        assert!(!is_newer("soon", "x", &c));
        let bad = CursorPayload {
            v: 1,
            t: "never".to_string(),
            ids: vec![],
        };
        assert!(!is_newer("2030-01-01T00:00:00Z", "x", &bad));
    }

    fn three_items() -> Vec<Item> {
        vec![
            item("n3", "2026-03-03T00:00:00Z"),
            item("n2", "2026-03-02T00:00:00Z"),
            item("n1", "2026-03-01T00:00:00Z"),
        ]
    }

    #[test]
    fn test_first_sync_then_no_changes() {
        let feed = three_items();
        let first = resolve_delta(&feed, None, 50);
        assert_eq!(first.items.len(), 3);
        let next = first.next_cursor.clone().unwrap();
        assert_eq!(next.t, "2026-03-03T00:00:00Z");
        assert_eq!(next.ids, vec!["n3"]);

        let second = resolve_delta(&feed, Some(&next), 50);
        assert!(second.items.is_empty());
        assert_eq!(second.next_cursor, Some(next));
    }

    #[test]
    fn test_new_items_after_cursor() {
        let mut feed = three_items();
        let c = resolve_delta(&feed, None, 50).next_cursor.unwrap();
        feed.insert(0, item("n4", "2026-03-04T00:00:00Z"));

        let delta = resolve_delta(&feed, Some(&c), 50);
        assert_eq!(delta.items, vec![item("n4", "2026-03-04T00:00:00Z")]);
        assert_eq!(delta.next_cursor.unwrap().ids, vec!["n4"]);
    }

    #[test]
    fn test_same_timestamp_publication_is_delivered_once() {
        let mut feed = vec![item("a", "2026-03-05T00:00:00Z"), item("old", "2026-03-01T00:00:00Z")];
        let c1 = resolve_delta(&feed, None, 50).next_cursor.unwrap();
        assert_eq!(c1.ids, vec!["a"]);

        feed.insert(1, item("b", "2026-03-05T00:00:00Z"));
        let d2 = resolve_delta(&feed, Some(&c1), 50);
        assert_eq!(d2.items, vec![item("b", "2026-03-05T00:00:00Z")]);
        let c2 = d2.next_cursor.unwrap();
        assert_eq!(c2.ids, vec!["a", "b"]);

        let d3 = resolve_delta(&feed, Some(&c2), 50);
        assert!(d3.items.is_empty());
        assert_eq!(d3.next_cursor, Some(c2));
    }

    #[test]
    fn test_limit_applies_but_cursor_tracks_newest() {
        let feed = three_items();
        let delta = resolve_delta(&feed, None, 1);
        assert_eq!(delta.items.len(), 1);
        assert_eq!(delta.next_cursor.unwrap().t, "2026-03-03T00:00:00Z");
    }

    #[test]
    fn test_empty_feed() {
        let feed: Vec<Item> = vec![];
        assert_eq!(resolve_delta(&feed, None, 10).next_cursor, None);

        let c = cursor("2026-03-01T00:00:00Z", &[]);
        assert_eq!(resolve_delta(&feed, Some(&c), 10).next_cursor, Some(c));
    }

    #[test]
    fn test_tie_ids_capped() {
        let ids: Vec<String> = (0..60).map(|i| format!("i{}", i)).collect();
        let feed: Vec<Item> = ids
            .iter()
            .map(|id| Item {
                id: Box::leak(id.clone().into_boxed_str()),
                ts: "2026-03-01T00:00:00Z",
            })
            .collect();
        let c = resolve_delta(&feed, None, 100).next_cursor.unwrap();
        assert_eq!(c.ids.len(), MAX_CURSOR_IDS);
    }
}
