//! Application-level error type returned by HTTP handlers

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::core::telephony::client::CarrierError;

/// Errors surfaced to HTTP clients as JSON `{"error": "..."}` bodies
#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload failed validation (bad phone number, missing field)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The carrier REST API rejected or failed an outbound call request
    #[error("Carrier request failed: {0}")]
    Carrier(#[from] CarrierError),

    /// Anything else that should not leak internals to the caller
    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Carrier(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(status = %status, error = %self, "Request failed");

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
