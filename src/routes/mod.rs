//! Router construction, grouped by consumer
//!
//! - `api` - Operator-facing REST API (auth-protected in main.rs)
//! - `media` - Carrier-facing call setup and media stream
//! - `webhooks` - Carrier-delivered lifecycle notifications

pub mod api;
pub mod media;
pub mod webhooks;

pub use api::create_api_router;
pub use media::create_media_router;
pub use webhooks::create_webhook_router;
