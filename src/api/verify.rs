//! Agent verification endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::verification::Verification;

/// Read-only verification routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/:handle", get(get_status))
}

/// Routes that trigger writes or outbound fetches; rate limited by the caller.
pub fn write_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(start))
        .route("/check", post(check))
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub agent_handle: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub agent_handle: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub success: bool,
    pub verification: Verification,
    /// Human-readable next step.
    pub instructions: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub verified: bool,
    pub verification: Verification,
}

/// POST /verify/start
async fn start(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let Json(req) = payload?;
    let verification = state
        .verifications
        .start(&req.agent_handle, &req.url)
        .await?;
    let instructions = format!(
        "Publish {} anywhere on {} before {}, then POST /verify/check",
        verification.code, verification.url, verification.expires_at
    );
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            success: true,
            verification,
            instructions,
        }),
    ))
}

/// POST /verify/check
async fn check(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> ApiResult<Json<CheckResponse>> {
    let Json(req) = payload?;
    let verification = state
        .verifications
        .check(&req.agent_handle, state.fetcher.as_ref())
        .await?;
    Ok(Json(CheckResponse {
        verified: verification.is_verified(),
        verification,
    }))
}

/// GET /verify/:handle
async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> ApiResult<Json<Verification>> {
    state
        .verifications
        .status(&handle)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}
