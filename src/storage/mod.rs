//! Persistence adapter for artifact records.
//!
//! Two interchangeable backends sit behind [`ArtifactBackend`]:
//! - [`SupabaseBackend`]: PostgREST table `artifacts`
//! - [`JsonFileBackend`]: a single `artifacts.json` document on disk
//!
//! The backend is chosen once at startup by [`select_backend`] and never
//! probed again per call.

mod json_file;
mod supabase;

pub use json_file::JsonFileBackend;
pub use supabase::SupabaseBackend;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::artifacts::{Artifact, ListQuery};
use crate::config::Config;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Neither backend is configured or usable. Not retryable.
    #[error("artifact store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Supabase request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Supabase returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Uniform list/get/insert over artifact records.
#[async_trait]
pub trait ArtifactBackend: Send + Sync {
    /// Short backend name for logs and the health endpoint.
    fn name(&self) -> &'static str;

    /// Artifacts created strictly before `query.before`, newest first, at
    /// most `query.effective_limit()` of them.
    async fn list(&self, query: &ListQuery) -> Result<Vec<Artifact>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Artifact>, StoreError>;

    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError>;
}

pub type SharedBackend = Arc<dyn ArtifactBackend>;

/// Apply a [`ListQuery`] to records already in memory.
///
/// Ordering is by parsed `created_at`, then id, both descending. Records whose
/// timestamp does not parse are skipped.
pub fn page_in_memory(artifacts: Vec<Artifact>, query: &ListQuery) -> Vec<Artifact> {
    let mut dated: Vec<(DateTime<Utc>, Artifact)> = artifacts
        .into_iter()
        .filter_map(|a| a.created_at_time().map(|t| (t, a)))
        .filter(|(t, _)| query.before.map_or(true, |before| *t < before))
        .collect();

    dated.sort_by(|(ta, a), (tb, b)| tb.cmp(ta).then_with(|| b.id.cmp(&a.id)));

    dated
        .into_iter()
        .take(query.effective_limit())
        .map(|(_, a)| a)
        .collect()
}

/// Pick the backend for this process.
///
/// Supabase wins when configured; otherwise the JSON file under the data
/// directory. With neither available this is a configuration error.
pub fn select_backend(config: &Config) -> Result<SharedBackend, StoreError> {
    if let Some(supabase) = &config.supabase {
        tracing::info!("Using Supabase artifact backend at {}", supabase.url);
        return Ok(Arc::new(SupabaseBackend::new(
            &supabase.url,
            &supabase.service_role_key,
        )));
    }

    let Some(data_dir) = &config.data_dir else {
        return Err(StoreError::Unavailable(
            "set SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY, or FORAGENTS_DATA_DIR".to_string(),
        ));
    };

    std::fs::create_dir_all(data_dir).map_err(|e| {
        StoreError::Unavailable(format!(
            "data directory {} is not usable: {}",
            data_dir.display(),
            e
        ))
    })?;

    let path = data_dir.join("artifacts.json");
    tracing::info!("Using JSON file artifact backend at {}", path.display());
    Ok(Arc::new(JsonFileBackend::new(path)))
}
