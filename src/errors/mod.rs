//! Error types for the VoiceBridge Gateway
//!
//! Split into two families: `AppError` for request handlers (maps to JSON error
//! responses) and `AuthError` for the authentication middleware (always 401/403).
//! Relay and upstream errors live next to their modules under `core` and are
//! converted into `AppError` at the handler boundary.

pub mod app_error;
pub mod auth_error;

pub use app_error::{AppError, AppResult};
pub use auth_error::{AuthError, AuthResult};
