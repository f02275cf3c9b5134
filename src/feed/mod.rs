//! News feed and cursor-based delta polling.
//!
//! The feed is a JSON array of [`FeedItem`] on disk, loaded into memory and
//! kept newest-first. Polling clients pass back the cursor from their previous
//! response and get only items published since.

pub mod cursor;
pub mod delta;

pub use cursor::{decode as decode_cursor, encode as encode_cursor, CursorPayload};
pub use delta::{is_newer, resolve_delta, Delta, DeltaItem};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::artifacts::parse_timestamp;

pub const DEFAULT_DELTA_LIMIT: usize = 50;
pub const MAX_DELTA_LIMIT: usize = 100;

/// A single news item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub published_at: String,
}

impl FeedItem {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(tag))
    }
}

impl DeltaItem for FeedItem {
    fn delta_id(&self) -> &str {
        &self.id
    }

    fn delta_timestamp(&self) -> &str {
        &self.published_at
    }
}

/// Parse a `limit` query value, clamping instead of rejecting.
pub fn clamp_delta_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(|n| n.clamp(1, MAX_DELTA_LIMIT as i64) as usize)
        .unwrap_or(DEFAULT_DELTA_LIMIT)
}

/// Sort newest-first. Items with unparseable timestamps sink to the end.
pub fn sort_newest_first(items: &mut [FeedItem]) {
    items.sort_by(|a, b| {
        let ta = parse_timestamp(&a.published_at);
        let tb = parse_timestamp(&b.published_at);
        tb.cmp(&ta).then_with(|| a.id.cmp(&b.id))
    });
}

/// In-memory snapshot of the feed file.
#[derive(Debug)]
pub struct FeedStore {
    items: RwLock<Arc<Vec<FeedItem>>>,
    storage_path: Option<PathBuf>,
}

impl FeedStore {
    /// Load the feed from `path`. A missing or broken file gives an empty feed.
    pub async fn load(path: PathBuf) -> Self {
        let items = match Self::read_items(&path).await {
            Ok(items) => {
                tracing::info!("Loaded {} feed items from {}", items.len(), path.display());
                items
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load feed from {}: {}, starting empty",
                    path.display(),
                    e
                );
                Vec::new()
            }
        };
        Self {
            items: RwLock::new(Arc::new(items)),
            storage_path: Some(path),
        }
    }

    /// Feed backed by a fixed list (no file).
    pub fn from_items(mut items: Vec<FeedItem>) -> Self {
        sort_newest_first(&mut items);
        Self {
            items: RwLock::new(Arc::new(items)),
            storage_path: None,
        }
    }

    async fn read_items(path: &PathBuf) -> Result<Vec<FeedItem>, std::io::Error> {
        let contents = tokio::fs::read_to_string(path).await?;
        let mut items: Vec<FeedItem> = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        sort_newest_first(&mut items);
        Ok(items)
    }

    /// Current items, newest first.
    pub async fn snapshot(&self) -> Arc<Vec<FeedItem>> {
        Arc::clone(&*self.items.read().await)
    }

    /// Re-read the feed file, keeping the old snapshot on failure.
    pub async fn reload(&self) -> Result<usize, std::io::Error> {
        let Some(path) = &self.storage_path else {
            return Ok(self.items.read().await.len());
        };
        let items = Self::read_items(path).await?;
        let count = items.len();
        *self.items.write().await = Arc::new(items);
        tracing::info!("Reloaded {} feed items from {}", count, path.display());
        Ok(count)
    }

    /// Resolve a delta against the current snapshot, optionally restricted to a tag.
    pub async fn delta(
        &self,
        cursor: Option<&CursorPayload>,
        tag: Option<&str>,
        limit: usize,
    ) -> Delta<FeedItem> {
        let snapshot = self.snapshot().await;
        match tag.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tag) => {
                let filtered: Vec<FeedItem> =
                    snapshot.iter().filter(|i| i.has_tag(tag)).cloned().collect();
                resolve_delta(&filtered, cursor, limit)
            }
            None => resolve_delta(snapshot.as_slice(), cursor, limit),
        }
    }
}

/// Re-read the feed file every `period` for the life of the process.
pub fn spawn_reload(feed: Arc<FeedStore>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately and the feed was just loaded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = feed.reload().await {
                tracing::warn!("Feed reload failed, keeping previous snapshot: {}", e);
            }
        }
    });
}
