//! Opaque delta-feed cursor.
//!
//! A cursor is base64url (no padding) of `{"v":1,"t":"<RFC 3339>","ids":[...]}`.
//! It is built by the server and echoed back by the client; the server keeps
//! no per-client state.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::artifacts::parse_timestamp;

pub const CURSOR_VERSION: u32 = 1;

/// Maximum tie-break ids carried in a cursor.
pub const MAX_CURSOR_IDS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPayload {
    pub v: u32,
    /// Timestamp of the newest item the client has seen.
    pub t: String,
    /// Items seen exactly at `t`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
}

impl CursorPayload {
    pub fn new(t: impl Into<String>, ids: Vec<String>) -> Self {
        let mut ids = ids;
        ids.truncate(MAX_CURSOR_IDS);
        Self {
            v: CURSOR_VERSION,
            t: t.into(),
            ids,
        }
    }
}

pub fn encode(payload: &CursorPayload) -> String {
    // Serializing a struct of strings cannot fail.
    let json = serde_json::to_vec(payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a client-supplied cursor. Anything malformed is `None`.
pub fn decode(token: &str) -> Option<CursorPayload> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .or_else(|_| URL_SAFE.decode(token))
        .ok()?;
    let mut payload: CursorPayload = serde_json::from_slice(&bytes).ok()?;

    if payload.v != CURSOR_VERSION || parse_timestamp(&payload.t).is_none() {
        return None;
    }
    payload.ids.truncate(MAX_CURSOR_IDS);
    Some(payload)
}
