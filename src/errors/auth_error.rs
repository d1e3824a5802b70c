//! Authentication error type used by the auth middleware

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors produced while authenticating a request
#[derive(Debug, Error)]
pub enum AuthError {
    /// No Authorization header and no token query parameter present
    #[error("Missing authentication credentials")]
    MissingAuthHeader,

    /// Authorization header present but not a valid Bearer token
    #[error("Invalid authorization header")]
    InvalidAuthHeader,

    /// Token did not match any configured API secret
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authentication is misconfigured on the server side
    #[error("Authentication configuration error: {0}")]
    ConfigError(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_header_maps_to_401() {
        let response = AuthError::MissingAuthHeader.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_config_error_maps_to_500() {
        let response = AuthError::ConfigError("no secrets".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
