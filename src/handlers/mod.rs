//! HTTP and WebSocket request handlers
//!
//! This module organizes all endpoint handlers into logical groups:
//! - `api` - Health check endpoint
//! - `calls` - Outbound call placement REST API
//! - `twiml` - Instruction document served to the carrier on call setup
//! - `webhooks` - Call status and machine-detection webhook logging
//! - `media` - Media-stream WebSocket running the relay

pub mod api;
pub mod calls;
pub mod media;
pub mod twiml;
pub mod webhooks;

// Re-export commonly used handlers for convenient access
pub use media::media_stream_handler;
