//! Carrier webhook route configuration

use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::webhooks;
use crate::state::AppState;
use std::sync::Arc;

/// Create the webhook router
///
/// # Endpoints
///
/// `POST /webhooks/call-status` - Call progress notifications
/// `POST /webhooks/amd` - Answering-machine-detection results
///
/// Both accept carrier form posts and always answer `200 OK`.
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks/call-status", post(webhooks::call_status_webhook))
        .route("/webhooks/amd", post(webhooks::amd_webhook))
        .layer(TraceLayer::new_for_http())
}
