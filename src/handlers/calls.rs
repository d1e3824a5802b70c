//! Outbound call placement endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::telephony::client::OutboundCallRequest;
use crate::errors::app_error::{AppError, AppResult};
use crate::middleware::AuthContext;
use crate::state::AppState;
use crate::utils::phone_validation::validate_phone_number;

/// Request body for `POST /v1/calls`
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceCallRequest {
    /// Destination number in E.164 format (formatting characters tolerated)
    pub to: String,
    /// System prompt for this call, overriding the configured default
    pub prompt: Option<String>,
    /// First message the agent speaks, overriding the configured default
    pub greeting: Option<String>,
}

/// Response body for a successfully placed call
#[derive(Debug, Clone, Serialize)]
pub struct PlaceCallResponse {
    /// Carrier identifier for the created call
    pub call_sid: String,
    /// Initial call status reported by the carrier, e.g. `queued`
    pub status: Option<String>,
}

/// Place an outbound call
///
/// Validates the destination number, then asks the carrier to dial it with
/// this server's instruction document URL. Per-call prompt and greeting are
/// carried as query parameters on that URL so the instruction endpoint can
/// embed them as stream parameters; when omitted, the configured defaults
/// apply at upstream connect time.
///
/// # Arguments
/// * `state` - Application state with the carrier client
/// * `request` - Destination number and optional per-call overrides
///
/// # Returns
/// * `201 Created` with `{call_sid, status}` on success
/// * `400 Bad Request` when the destination number is invalid
/// * `502 Bad Gateway` when the carrier rejects the request
pub async fn place_call(
    State(state): State<Arc<AppState>>,
    auth: Option<Extension<AuthContext>>,
    Json(request): Json<PlaceCallRequest>,
) -> AppResult<(StatusCode, Json<PlaceCallResponse>)> {
    let to = validate_phone_number(&request.to)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let public_base = state.config.public_url.trim_end_matches('/');
    let instruction_url = build_instruction_url(
        public_base,
        request.prompt.as_deref(),
        request.greeting.as_deref(),
    );

    let call = OutboundCallRequest {
        to: to.clone(),
        instruction_url,
        status_callback: Some(format!("{public_base}/webhooks/call-status")),
        amd_callback: Some(format!("{public_base}/webhooks/amd")),
    };

    let placed = state.carrier.place_call(&call).await?;

    let auth_id = auth.and_then(|Extension(context)| context.auth_id);
    info!(
        call_sid = %placed.sid,
        to = %to,
        status = ?placed.status,
        auth_id = auth_id.as_deref(),
        "Outbound call created"
    );

    Ok((
        StatusCode::CREATED,
        Json(PlaceCallResponse {
            call_sid: placed.sid,
            status: placed.status,
        }),
    ))
}

/// Build the instruction document URL, attaching per-call overrides as
/// URL-encoded query parameters.
fn build_instruction_url(public_base: &str, prompt: Option<&str>, greeting: Option<&str>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Some(prompt) = prompt {
        serializer.append_pair("prompt", prompt);
    }
    if let Some(greeting) = greeting {
        serializer.append_pair("greeting", greeting);
    }
    let query = serializer.finish();

    if query.is_empty() {
        format!("{public_base}/twiml")
    } else {
        format!("{public_base}/twiml?{query}")
    }
}
