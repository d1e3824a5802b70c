//! Telephony media-stream wire protocol
//!
//! This module defines the JSON events exchanged over the carrier's
//! bidirectional media-stream WebSocket, plus the base64 audio codec. Inbound
//! events (`connected`, `start`, `media`, `stop`) arrive as text frames with an
//! `event` discriminator; outbound commands (`media`, `clear`) are serialized
//! the same way. Audio payloads are 8 kHz mu-law, base64-encoded on the wire.
//! No resampling or transcoding happens here: a format mismatch in the `start`
//! metadata is a configuration error, logged once and not handled at runtime.

use std::collections::HashMap;

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while decoding or encoding media-stream frames
#[derive(Debug, Error)]
pub enum CodecError {
    /// The text frame was not valid JSON for any known event shape
    #[error("Malformed telephony event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    /// The `media.payload` field was not valid base64
    #[error("Invalid audio payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
}

// =============================================================================
// Inbound Events (carrier -> gateway)
// =============================================================================

/// Inbound media-stream events, discriminated by the `event` field
///
/// Unrecognized event types (`mark`, `dtmf`, future additions) deserialize to
/// [`TelephonyEvent::Unknown`] so the relay can log and skip them instead of
/// failing the session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// First frame after the WebSocket opens, before any call metadata
    Connected {
        protocol: Option<String>,
        version: Option<String>,
    },

    /// Call metadata: identifiers, subscribed tracks, and custom parameters
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },

    /// One ~20 ms frame of caller audio
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: Option<String>,
        media: MediaPayload,
    },

    /// The carrier has ended the stream (call hung up or redirected)
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: Option<String>,
        stop: Option<StopMetadata>,
    },

    /// Any event type this gateway does not consume
    #[serde(other)]
    Unknown,
}

/// Metadata carried on the `start` event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub account_sid: String,
    pub stream_sid: String,
    pub call_sid: String,
    /// Which tracks the stream subscribes to, e.g. `["inbound"]`
    #[serde(default)]
    pub tracks: Vec<String>,
    pub media_format: Option<MediaFormat>,
    /// `<Parameter>` values from the instruction document (prompt, greeting)
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Negotiated audio format reported by the carrier
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u32,
}

impl MediaFormat {
    /// Whether the carrier negotiated the only format this relay forwards
    pub fn is_mulaw_8khz(&self) -> bool {
        self.encoding.eq_ignore_ascii_case("audio/x-mulaw") && self.sample_rate == 8000
    }
}

/// Payload of a `media` event
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// `inbound` (caller) or `outbound` (what the carrier played back)
    pub track: Option<String>,
    pub chunk: Option<String>,
    pub timestamp: Option<String>,
    /// Base64-encoded mu-law audio
    pub payload: String,
}

impl MediaPayload {
    /// Whether this frame carries caller audio (the only track the relay forwards)
    pub fn is_inbound(&self) -> bool {
        match self.track.as_deref() {
            Some(track) => track.eq_ignore_ascii_case("inbound"),
            // Streams subscribed to a single track omit the label
            None => true,
        }
    }

    /// Decode the base64 payload into raw mu-law bytes
    pub fn decode(&self) -> Result<Bytes, CodecError> {
        decode_media_payload(&self.payload)
    }
}

/// Metadata carried on the `stop` event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMetadata {
    pub account_sid: Option<String>,
    pub call_sid: Option<String>,
}

/// Parse one inbound text frame into a typed event
///
/// # Arguments
/// * `text` - The raw JSON text frame from the media-stream WebSocket
///
/// # Returns
/// * `Result<TelephonyEvent, CodecError>` - The parsed event, or a
///   `MalformedEvent` error the caller should log and skip
pub fn parse_telephony_event(text: &str) -> Result<TelephonyEvent, CodecError> {
    Ok(serde_json::from_str(text)?)
}

// =============================================================================
// Outbound Commands (gateway -> carrier)
// =============================================================================

/// Outbound media-stream commands, serialized with an `event` discriminator
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    /// Play agent audio to the caller
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    /// Drop all queued playback immediately (barge-in)
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Payload of an outbound `media` command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutboundMedia {
    /// Base64-encoded mu-law audio
    pub payload: String,
}

impl TelephonyCommand {
    /// Build a `media` command from raw mu-law bytes
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        TelephonyCommand::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: encode_media_payload(audio),
            },
        }
    }

    /// Build a `media` command from an already base64-encoded payload
    ///
    /// Used when relaying agent audio that arrived base64-encoded, avoiding a
    /// decode/re-encode round trip on the hot path.
    pub fn media_from_encoded(stream_sid: &str, payload: String) -> Self {
        TelephonyCommand::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    /// Build a `clear` command for barge-in
    pub fn clear(stream_sid: &str) -> Self {
        TelephonyCommand::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

// =============================================================================
// Audio Payload Codec
// =============================================================================

/// Decode a base64 audio payload into raw mu-law bytes
pub fn decode_media_payload(payload: &str) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(BASE64_STANDARD.decode(payload)?))
}

/// Encode raw mu-law bytes into a base64 audio payload
pub fn encode_media_payload(audio: &[u8]) -> String {
    BASE64_STANDARD.encode(audio)
}
