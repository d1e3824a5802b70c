//! Carrier-facing route configuration
//!
//! These routes are consumed by the telephony carrier, not by API clients: the
//! instruction document it fetches when a call is answered, and the media
//! stream it opens afterwards. Neither carries bearer authentication; the
//! media stream is connection-limited instead (middleware applied in main.rs).

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media::media_stream_handler;
use crate::handlers::twiml::instruction_document;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media router
///
/// # Endpoints
///
/// `GET|POST /twiml` - TwiML instruction document for call setup
/// `GET /media-stream` - WebSocket upgrade for the bidirectional audio stream
///
/// # Protocol
///
/// After WebSocket upgrade, the carrier sends:
/// 1. `connected`, then `start` with call metadata and custom parameters
/// 2. `media` frames carrying base64 mu-law caller audio
/// 3. `stop` when the call ends
///
/// The gateway responds with:
/// - `media` frames carrying agent audio
/// - `clear` on agent interruption (barge-in)
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/twiml",
            get(instruction_document).post(instruction_document),
        )
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
