//! Instruction document endpoint
//!
//! The carrier fetches this document when a call is answered. It tells the
//! carrier to open a bidirectional media stream to this server and passes the
//! per-call prompt and greeting through as stream parameters.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;

use crate::core::telephony::twiml::MediaStreamTwiml;
use crate::state::AppState;

const CONTENT_TYPE: &str = "text/xml";

/// Query parameters attached to the instruction URL at call-placement time
#[derive(Debug, Default, Deserialize)]
pub struct InstructionParams {
    pub prompt: Option<String>,
    pub greeting: Option<String>,
}

/// Serve the TwiML instruction document
///
/// Responds identically to GET and POST; the carrier's method is
/// configuration-dependent. Prompt and greeting query parameters become
/// `<Parameter>` elements on the stream so they survive into the media
/// stream's start event.
pub async fn instruction_document(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InstructionParams>,
) -> Response {
    debug!(
        has_prompt = params.prompt.is_some(),
        has_greeting = params.greeting.is_some(),
        "Serving instruction document"
    );

    let body = MediaStreamTwiml::new(
        state.config.media_stream_url(),
        state.config.max_hold_seconds,
    )
    .parameter_opt("prompt", params.prompt.as_deref())
    .parameter_opt("greeting", params.greeting.as_deref())
    .render();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE))],
        body,
    )
        .into_response()
}
