//! API error type and HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use stripemirror_engine::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or unverifiable request; the message is returned to the caller
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Logged in full, reported to the caller without details
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(what) => ApiError::NotFound(what),
            e if e.is_client_error() => ApiError::Validation(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripemirror_engine::StoreError;

    #[test]
    fn test_sync_error_mapping() {
        let validation: ApiError =
            SyncError::Validation("requires a data attribute as an object".into()).into();
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.to_string(), "requires a data attribute as an object");

        let signature: ApiError = SyncError::WebhookSignatureInvalid.into();
        assert_eq!(signature.status_code(), StatusCode::BAD_REQUEST);

        let missing: ApiError = SyncError::NotFound("webhook event evt_1".into()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let storage: ApiError = SyncError::Store(StoreError::Backend("pool timed out".into())).into();
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let source: ApiError = SyncError::UnknownSourceObject("sepa_debit".into()).into();
        assert_eq!(source.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
