use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    /// The requested image id has no record
    #[error("Image not found")]
    NotFound,

    /// Storage, persistence or any other failure, carrying the raw message
    #[error("{0}")]
    Internal(String),

    /// The upload body was rejected while being read (too large, malformed)
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        // `{:#}` keeps the whole context chain on one line
        ApiError::Internal(format!("{:#}", e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Multipart(e) => e.status(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref message) = self {
            error!(error = %message, "Request failed");
        }

        let detail = match self {
            ApiError::Multipart(ref e) => e.body_text(),
            ref other => other.to_string(),
        };
        let body = ErrorResponse { detail };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"))
            .context("Failed to upload object to S3");
        let api_err: ApiError = err.unwrap_err().into();

        assert_eq!(
            api_err.to_string(),
            "Failed to upload object to S3: connection refused"
        );
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(ApiError::NotFound.to_string(), "Image not found");
    }
}
