//! Artifact store: create, remix, lineage lookup and time-ordered listing.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::validate::{normalize_tags, validate, TITLE_MAX_CHARS};
use super::{
    new_artifact_id, now_timestamp, parse_timestamp, Artifact, ArtifactInput,
    ArtifactWithLineage, ANONYMOUS_AUTHOR,
};
use crate::metrics::{ViralEvent, ViralEvents};
use crate::storage::{page_in_memory, ArtifactBackend, StoreError};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Upper bound on lineage walks, independent of the cycle guard.
const MAX_LINEAGE_DEPTH: usize = 100;

const REMIX_TITLE_PREFIX: &str = "Remix of: ";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("artifact {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Paging parameters for [`ArtifactStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: Option<usize>,
    /// Only artifacts created strictly before this instant.
    pub before: Option<DateTime<Utc>>,
}

impl ListQuery {
    /// Requested limit clamped to `1..=MAX_LIST_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Clone)]
pub struct ArtifactStore {
    backend: Arc<dyn ArtifactBackend>,
    viral: ViralEvents,
}

impl ArtifactStore {
    pub fn new(backend: Arc<dyn ArtifactBackend>, viral: ViralEvents) -> Self {
        Self { backend, viral }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Validate, normalize and persist a new root artifact.
    pub async fn create(&self, input: ArtifactInput) -> Result<Artifact, ArtifactError> {
        let artifact = build_artifact(&input, None)?;
        self.backend.insert(&artifact).await?;
        tracing::info!("Created artifact {} ({})", artifact.id, artifact.title);
        Ok(artifact)
    }

    /// Create a child of `parent_id`, inheriting omitted fields from the parent.
    ///
    /// The parent link always comes from `parent_id`; callers cannot set it.
    pub async fn remix(
        &self,
        parent_id: &str,
        input: ArtifactInput,
    ) -> Result<Artifact, ArtifactError> {
        let parent = self
            .backend
            .get(parent_id)
            .await?
            .ok_or_else(|| ArtifactError::NotFound(parent_id.to_string()))?;

        let merged = ArtifactInput {
            title: input
                .title
                .filter(|t| !t.trim().is_empty())
                .or_else(|| Some(remix_title(&parent.title))),
            body: input
                .body
                .filter(|b| !b.trim().is_empty())
                .or_else(|| Some(parent.body.clone())),
            author: input.author,
            tags: input.tags.or_else(|| Some(parent.tags.clone())),
        };

        let artifact = build_artifact(&merged, Some(parent.id.clone()))?;
        self.backend.insert(&artifact).await?;
        tracing::info!("Remixed artifact {} into {}", parent.id, artifact.id);

        self.viral.emit(ViralEvent::remix(
            &artifact.id,
            &parent.id,
            &artifact.created_at,
        ));

        Ok(artifact)
    }

    /// Look up an artifact and resolve its ancestors.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<ArtifactWithLineage>, ArtifactError> {
        let Some(artifact) = self.backend.get(id).await? else {
            return Ok(None);
        };
        let lineage = self.lineage_of(&artifact).await?;
        Ok(Some(ArtifactWithLineage { artifact, lineage }))
    }

    /// Walk `parent_artifact_id` links upward, nearest parent first.
    ///
    /// Stops at a root, a missing parent, or an id already seen.
    async fn lineage_of(&self, artifact: &Artifact) -> Result<Vec<Artifact>, ArtifactError> {
        let mut lineage = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(artifact.id.clone());

        let mut next = artifact.parent_artifact_id.clone();
        while let Some(parent_id) = next {
            if lineage.len() >= MAX_LINEAGE_DEPTH {
                tracing::warn!("Lineage of {} exceeds {} hops, truncating", artifact.id, MAX_LINEAGE_DEPTH);
                break;
            }
            if !visited.insert(parent_id.clone()) {
                tracing::warn!("Lineage cycle at {} while resolving {}", parent_id, artifact.id);
                break;
            }
            let Some(parent) = self.backend.get(&parent_id).await? else {
                tracing::debug!("Parent {} of lineage for {} is missing", parent_id, artifact.id);
                break;
            };
            next = parent.parent_artifact_id.clone();
            lineage.push(parent);
        }

        Ok(lineage)
    }

    /// Newest-first page of artifacts.
    ///
    /// The backend bounds the page; it is re-sorted here by parsed instant so
    /// every backend orders the same way.
    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Artifact>, ArtifactError> {
        let rows = self.backend.list(query).await?;
        Ok(page_in_memory(rows, query))
    }
}

fn remix_title(parent_title: &str) -> String {
    let budget = TITLE_MAX_CHARS - REMIX_TITLE_PREFIX.chars().count();
    let title: String = parent_title.trim().chars().take(budget).collect();
    format!("{}{}", REMIX_TITLE_PREFIX, title)
}

fn build_artifact(
    input: &ArtifactInput,
    parent_artifact_id: Option<String>,
) -> Result<Artifact, ArtifactError> {
    let errors = validate(input);
    if !errors.is_empty() {
        return Err(ArtifactError::Validation(errors));
    }

    let author = input
        .author
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(ANONYMOUS_AUTHOR)
        .to_string();

    Ok(Artifact {
        id: new_artifact_id(),
        title: input.title.as_deref().unwrap_or_default().trim().to_string(),
        body: input.body.as_deref().unwrap_or_default().trim().to_string(),
        author,
        tags: normalize_tags(input.tags.as_deref().unwrap_or_default()),
        created_at: now_timestamp(),
        parent_artifact_id,
    })
}

/// Parse a `before` query value; unparseable input means "no bound".
pub fn parse_before(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(parse_timestamp)
}
