//! Artifact API endpoints.
//!
//! - `GET  /artifacts` - newest-first page (`limit`, `before`)
//! - `POST /artifacts` - publish an artifact
//! - `GET  /artifacts/:id` - one artifact with its lineage
//! - `POST /artifacts/:id/remix` - publish a remix of an artifact

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::artifacts::store::parse_before;
use crate::artifacts::{now_timestamp, Artifact, ArtifactInput, ArtifactWithLineage, ListQuery};

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Query string for `GET /artifacts`. Kept as raw strings so bad values are
/// clamped or ignored instead of rejected.
#[derive(Debug, Default, Deserialize)]
pub struct ListArtifactsQuery {
    pub limit: Option<String>,
    pub before: Option<String>,
}

impl ListArtifactsQuery {
    fn to_list_query(&self) -> ListQuery {
        ListQuery {
            limit: self
                .limit
                .as_deref()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .map(|n| n.max(0) as usize),
            before: parse_before(self.before.as_deref()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListArtifactsResponse {
    pub items: Vec<Artifact>,
    pub count: usize,
    /// Pass as `before` to fetch the next page; null on the last page.
    pub next_before: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct ArtifactCreatedResponse {
    pub success: bool,
    pub artifact: Artifact,
}

#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    pub artifact: ArtifactWithLineage,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /artifacts
pub async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListArtifactsQuery>,
) -> ApiResult<Json<ListArtifactsResponse>> {
    let list_query = query.to_list_query();
    let limit = list_query.effective_limit();
    let items = state.artifacts.list(&list_query).await?;

    let next_before = if items.len() == limit {
        items.last().map(|a| a.created_at.clone())
    } else {
        None
    };

    Ok(Json(ListArtifactsResponse {
        count: items.len(),
        items,
        next_before,
        updated_at: now_timestamp(),
    }))
}

/// POST /artifacts
pub async fn create_artifact(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<ArtifactCreatedResponse>)> {
    let input = parse_input(body, false)?;
    let artifact = state.artifacts.create(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ArtifactCreatedResponse {
            success: true,
            artifact,
        }),
    ))
}

/// GET /artifacts/:id
pub async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ArtifactResponse>> {
    let artifact = state
        .artifacts
        .get_by_id(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(ArtifactResponse { artifact }))
}

/// POST /artifacts/:id/remix
pub async fn remix_artifact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<ArtifactCreatedResponse>)> {
    let input = parse_input(body, true)?;
    let artifact = state.artifacts.remix(&id, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ArtifactCreatedResponse {
            success: true,
            artifact,
        }),
    ))
}

/// Read a JSON request body into an [`ArtifactInput`].
///
/// Oversized bodies become 413. An empty body is only accepted for remixes,
/// where every field is optional.
fn parse_input(
    body: Result<Bytes, BytesRejection>,
    allow_empty: bool,
) -> ApiResult<ArtifactInput> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return if allow_empty {
            Ok(ArtifactInput::default())
        } else {
            Err(ApiError::ValidationFailed(vec![
                "title is required".to_string(),
                "body is required".to_string(),
            ]))
        };
    }

    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|_| ApiError::BadRequest("Invalid JSON".to_string()))?;
    if !value.is_object() {
        return Err(ApiError::BadRequest("Invalid JSON".to_string()));
    }
    Ok(ArtifactInput::from_json(&value))
}
