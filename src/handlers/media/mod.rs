//! Telephony media-stream WebSocket handler
//!
//! This module hosts the carrier-facing side of the relay: the WebSocket
//! endpoint the carrier connects to after fetching the instruction document.
//!
//! # Protocol
//!
//! ## Carrier → Gateway
//!
//! - **connected**: Handshake frame, no call metadata yet
//! - **start**: Call identifiers, track list, and custom parameters
//! - **media**: One ~20 ms base64 mu-law audio frame
//! - **stop**: The stream has ended (hangup or redirect)
//!
//! ## Gateway → Carrier
//!
//! - **media**: Agent audio to play to the caller
//! - **clear**: Drop queued playback immediately (barge-in)
//!
//! Each connection runs its own relay state machine; see
//! [`crate::core::relay`] for the lifecycle rules.

mod handler;

pub use handler::media_stream_handler;
