//! HTTP error taxonomy.
//!
//! Every handler error ends up here and is rendered as `{"error": ...}` JSON.

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::storage::StoreError;
use crate::verification::VerificationError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    ValidationFailed(Vec<String>),

    #[error("{0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Gone(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("{0}")]
    Unprocessable(String),

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ValidationFailed(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::StoreUnavailable(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = match &self {
            ApiError::ValidationFailed(details) => json!({
                "error": "Validation failed",
                "details": details,
            }),
            // Do not leak backend details to clients.
            ApiError::StoreUnavailable(_) | ApiError::Internal(_) => json!({
                "error": "Internal server error",
            }),
            other => json!({ "error": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonSyntaxError(_) => ApiError::BadRequest("Invalid JSON".to_string()),
            r if r.status() == StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
            r => ApiError::BadRequest(r.body_text()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => ApiError::StoreUnavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(e: ArtifactError) -> Self {
        match e {
            ArtifactError::Validation(details) => ApiError::ValidationFailed(details),
            ArtifactError::NotFound(_) => ApiError::NotFound,
            ArtifactError::Store(e) => e.into(),
        }
    }
}

impl From<VerificationError> for ApiError {
    fn from(e: VerificationError) -> Self {
        match e {
            VerificationError::InvalidHandle | VerificationError::InvalidUrl => {
                ApiError::ValidationFailed(vec![e.to_string()])
            }
            VerificationError::NotFound(_) => ApiError::NotFound,
            VerificationError::Expired(_) => ApiError::Gone(e.to_string()),
            VerificationError::CodeMissing(_) => ApiError::Unprocessable(e.to_string()),
            VerificationError::FetchFailed { .. } => ApiError::BadGateway(e.to_string()),
        }
    }
}
