//! Bearer-token authentication middleware

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::errors::auth_error::AuthError;
use crate::state::AppState;

/// Authenticated caller identity inserted into request extensions
///
/// Handlers can access this via `Extension<AuthContext>` to attribute actions
/// to the configured API secret that authorized them.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Configured id of the matched API secret, `None` when auth is disabled
    pub auth_id: Option<String>,
}

impl AuthContext {
    /// Context for deployments with authentication disabled
    pub fn disabled() -> Self {
        Self { auth_id: None }
    }

    /// Context for a request authorized by the named API secret
    pub fn new(auth_id: impl Into<String>) -> Self {
        Self {
            auth_id: Some(auth_id.into()),
        }
    }
}

/// Extract authentication token from request
///
/// Supports multiple token sources for dialer/WebSocket compatibility:
/// 1. Authorization header: `Authorization: Bearer <token>` (preferred)
/// 2. Query parameter: `?token=<token>` (for clients that cannot set headers)
///
/// # Arguments
/// * `request` - The incoming HTTP request
///
/// # Returns
/// * `Result<String, AuthError>` - The extracted token or an error
fn extract_token(request: &Request) -> Result<String, AuthError> {
    // Try Authorization header first (preferred method)
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            tracing::debug!("Token extracted from Authorization header");
            return Ok(token.to_string());
        }
        return Err(AuthError::InvalidAuthHeader);
    }

    // Try query parameter
    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                tracing::debug!("Token extracted from query parameter");
                return Ok(value.to_string());
            }
        }
    }

    // No token found
    Err(AuthError::MissingAuthHeader)
}

/// Authentication middleware that validates bearer tokens against the
/// configured API secrets
///
/// The middleware:
/// 1. Passes every request through (with an empty context) when no API
///    secrets are configured
/// 2. Extracts the token from the Authorization header or query parameter
/// 3. Compares it against configured secrets in constant time
/// 4. Inserts an [`AuthContext`] into request extensions on success
/// 5. Returns 401 if extraction or validation fails
///
/// # Arguments
/// * `state` - Application state containing the ServerConfig
/// * `request` - The incoming HTTP request
/// * `next` - The next middleware or handler in the chain
///
/// # Returns
/// * `Result<Response, AuthError>` - The response from the next handler or an auth error
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    // Skip authentication if no secrets are configured
    // Still insert an empty context so handlers that read it keep working
    if !state.config.has_api_secret_auth() {
        tracing::debug!("Authentication disabled, inserting empty auth context");
        request.extensions_mut().insert(AuthContext::disabled());
        return Ok(next.run(request).await);
    }

    let request_method = request.method().to_string();
    let request_path = request.uri().path().to_string();

    let token = extract_token(&request)?;

    match state.config.find_api_secret_id(&token) {
        Some(secret_id) => {
            tracing::info!(
                method = %request_method,
                path = %request_path,
                auth_id = %secret_id,
                "API secret authentication successful"
            );
            let context = AuthContext::new(secret_id);
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(
                method = %request_method,
                path = %request_path,
                "API secret authentication failed: token mismatch"
            );
            Err(AuthError::Unauthorized("Invalid API secret".to_string()))
        }
    }
}
