//! Artifacts: user-published content records with remix lineage.
//!
//! # Key Concepts
//! - Artifact: a title/body/tags record with an immutable `art_` id
//! - Remix: an artifact created from another one, recording `parent_artifact_id`
//! - Lineage: ancestors from nearest parent to root, computed on read

pub mod store;
pub mod validate;

pub use store::{ArtifactError, ArtifactStore, ListQuery};
pub use validate::{normalize_tags, validate};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author label used when the caller does not supply one.
pub const ANONYMOUS_AUTHOR: &str = "anonymous";

/// A stored artifact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// RFC 3339 UTC timestamp; the only sort key for listing.
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_artifact_id: Option<String>,
}

impl Artifact {
    /// Parsed `created_at`, or `None` for records written with a bad timestamp.
    pub fn created_at_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }
}

/// An artifact plus its derived ancestor chain.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactWithLineage {
    #[serde(flatten)]
    pub artifact: Artifact,
    /// Nearest parent first. Omitted for root artifacts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lineage: Vec<Artifact>,
}

/// Create/remix request fields, extracted leniently from raw JSON.
///
/// A field of the wrong JSON type is treated as absent and non-string tag
/// entries are dropped, so validation reports on what is left.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactInput {
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ArtifactInput {
    pub fn from_json(value: &serde_json::Value) -> Self {
        let string_field = |name: &str| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let tags = value.get("tags").and_then(|v| v.as_array()).map(|items| {
            items
                .iter()
                .filter_map(|t| t.as_str().map(|s| s.to_string()))
                .collect()
        });

        Self {
            title: string_field("title"),
            body: string_field("body"),
            author: string_field("author"),
            tags,
        }
    }
}

/// Generate a fresh artifact id (`art_` + 12 hex chars).
pub fn new_artifact_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("art_{}", &simple[..12])
}

/// Current time formatted the way artifacts store it.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
