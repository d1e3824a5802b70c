//! Health check endpoint

use std::sync::Arc;

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

/// Health check handler
///
/// Reports service identity and the number of live media streams. Mounted
/// without authentication so load balancers can probe it.
///
/// # Returns
/// * `Json<Value>` - Service status as JSON
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "active_streams": state.ws_connection_count(),
    }))
}
