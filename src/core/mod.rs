pub mod relay;
pub mod telephony;
pub mod upstream;

// Re-export commonly used types for convenience
pub use telephony::{
    CarrierClient, CarrierError, CodecError, MediaFormat, MediaPayload, MediaStreamTwiml,
    OutboundCallRequest, OutboundMedia, PlacedCall, StartMetadata, TelephonyCommand,
    TelephonyEvent, decode_media_payload, encode_media_payload, parse_telephony_event,
};

pub use upstream::{
    BoxedUpstreamSession, RetryPolicy, UpstreamConfig, UpstreamError, UpstreamEvent,
    UpstreamResult, UpstreamSession, UpstreamVariant, create_upstream_session,
};

pub use relay::session::{RelayAction, RelayEvent, RelayState, RelaySession};
pub use relay::silence::{SilenceDetector, SilenceWindow};
