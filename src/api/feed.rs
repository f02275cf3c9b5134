//! `GET /feed/delta` - cursor-based polling of the news feed.
//!
//! A missing, malformed or foreign cursor means "first sync"; a bad `limit`
//! is clamped. The endpoint therefore never fails on client input.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::routes::AppState;
use crate::artifacts::now_timestamp;
use crate::feed::{clamp_delta_limit, decode_cursor, encode_cursor, FeedItem};

#[derive(Debug, Default, Deserialize)]
pub struct DeltaQuery {
    pub cursor: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeltaResponse {
    pub items: Vec<FeedItem>,
    pub count: usize,
    pub next_cursor: Option<String>,
    pub updated_at: String,
}

/// GET /feed/delta
pub async fn feed_delta(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeltaQuery>,
) -> impl IntoResponse {
    let cursor = query.cursor.as_deref().and_then(|raw| {
        let decoded = decode_cursor(raw);
        if decoded.is_none() && !raw.trim().is_empty() {
            tracing::debug!("Ignoring undecodable feed cursor");
        }
        decoded
    });
    let limit = clamp_delta_limit(query.limit.as_deref());

    let delta = state
        .feed
        .delta(cursor.as_ref(), query.tag.as_deref(), limit)
        .await;

    let response = DeltaResponse {
        count: delta.items.len(),
        items: delta.items,
        next_cursor: delta.next_cursor.as_ref().map(encode_cursor),
        updated_at: now_timestamp(),
    };

    ([(header::CACHE_CONTROL, "no-store")], Json(response))
}
