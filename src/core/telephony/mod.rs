//! Telephony carrier integration.
//!
//! Three pieces: the media-stream wire protocol and frame codec
//! ([`stream`]), the instruction-document builder ([`twiml`]), and the
//! call-control REST client ([`client`]).

pub mod client;
pub mod stream;
pub mod twiml;

pub use client::{CarrierClient, CarrierError, OutboundCallRequest, PlacedCall};
pub use stream::{
    CodecError, MediaFormat, MediaPayload, OutboundMedia, StartMetadata, TelephonyCommand,
    TelephonyEvent, decode_media_payload, encode_media_payload, parse_telephony_event,
};
pub use twiml::MediaStreamTwiml;
