//! Voice-AI session WebSocket message types.
//!
//! This module defines the outbound and inbound messages for the agent
//! session socket. All messages are JSON-encoded text frames; binary frames
//! from the agent are treated as raw audio.
//!
//! # Protocol Overview
//!
//! Outbound messages (sent to the agent):
//! - conversation_initiation_client_data - Configure the conversation (first message on the wire)
//! - user_audio_chunk - Caller audio (base64, no `type` discriminator)
//! - pong - Keepalive reply, echoing the ping's event id
//! - contextual_update - Out-of-band text context (used for silence prompts)
//!
//! Inbound events (received from the agent, `type`-discriminated):
//! - conversation_initiation_metadata - Session metadata after init
//! - audio - Agent audio chunk (base64)
//! - interruption - Caller barge-in, stop playback
//! - ping - Keepalive expecting a pong
//! - agent_response - Agent reply transcript
//! - user_transcript - Caller speech transcript
//!
//! Unrecognized inbound event types deserialize to [`AgentEvent::Unknown`]
//! and are skipped, not treated as protocol errors.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Outbound Messages (gateway -> agent)
// =============================================================================

/// Outbound messages for the agent session socket.
///
/// Untagged because the audio message carries no `type` field on the wire —
/// each variant's struct supplies its own shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum AgentMessage {
    /// Conversation configuration, sent once before anything else
    Init(ConversationInit),
    /// One chunk of caller audio
    Audio(UserAudioChunk),
    /// Keepalive reply
    Pong(Pong),
    /// Out-of-band context for the agent
    ContextualUpdate(ContextualUpdate),
}

impl AgentMessage {
    /// Build the initialization message from session parameters.
    ///
    /// Override sections are omitted entirely when no parameter in them is
    /// set, letting the agent's server-side defaults apply.
    pub fn init(
        prompt: Option<&str>,
        greeting: Option<&str>,
        voice_id: Option<&str>,
    ) -> Self {
        let agent = if prompt.is_some() || greeting.is_some() {
            Some(AgentOverride {
                prompt: prompt.map(|p| PromptOverride {
                    prompt: p.to_string(),
                }),
                first_message: greeting.map(str::to_string),
            })
        } else {
            None
        };

        let tts = voice_id.map(|v| TtsOverride {
            voice_id: v.to_string(),
        });

        let conversation_config_override = if agent.is_some() || tts.is_some() {
            Some(ConversationConfigOverride { agent, tts })
        } else {
            None
        };

        AgentMessage::Init(ConversationInit {
            message_type: "conversation_initiation_client_data".to_string(),
            conversation_config_override,
        })
    }

    /// Build an audio message from raw mu-law bytes.
    pub fn audio(data: &[u8]) -> Self {
        AgentMessage::Audio(UserAudioChunk {
            user_audio_chunk: BASE64_STANDARD.encode(data),
        })
    }

    /// Build a keepalive reply echoing the ping's event id.
    pub fn pong(event_id: Option<u64>) -> Self {
        AgentMessage::Pong(Pong {
            message_type: "pong".to_string(),
            event_id,
        })
    }

    /// Build a contextual update carrying the silence prompt.
    pub fn contextual_update(text: &str) -> Self {
        AgentMessage::ContextualUpdate(ContextualUpdate {
            message_type: "contextual_update".to_string(),
            text: text.to_string(),
        })
    }
}

/// Conversation initialization payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationInit {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_config_override: Option<ConversationConfigOverride>,
}

/// Per-call overrides for the agent's server-side configuration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOverride>,
}

/// Prompt and first-message overrides.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
}

/// System prompt override.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromptOverride {
    pub prompt: String,
}

/// Voice override.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TtsOverride {
    pub voice_id: String,
}

/// Caller audio chunk. No `type` field on the wire.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserAudioChunk {
    pub user_audio_chunk: String,
}

/// Keepalive reply.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pong {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
}

/// Out-of-band text context.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextualUpdate {
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: String,
}

// =============================================================================
// Inbound Events (agent -> gateway)
// =============================================================================

/// Inbound events from the agent session socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Session metadata delivered after initialization
    #[serde(rename = "conversation_initiation_metadata")]
    ConversationInitiationMetadata {
        #[serde(rename = "conversation_initiation_metadata_event")]
        metadata: InitiationMetadata,
    },

    /// Agent audio chunk
    #[serde(rename = "audio")]
    Audio {
        #[serde(rename = "audio_event")]
        audio_event: AudioEvent,
    },

    /// Caller barge-in: stop playing queued agent audio
    #[serde(rename = "interruption")]
    Interruption {
        #[serde(rename = "interruption_event")]
        interruption_event: Option<InterruptionEvent>,
    },

    /// Keepalive expecting a pong with the same event id
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "ping_event")]
        ping_event: Option<PingEvent>,
    },

    /// Agent reply transcript (informational)
    #[serde(rename = "agent_response")]
    AgentResponse {
        #[serde(rename = "agent_response_event")]
        agent_response_event: AgentResponseEvent,
    },

    /// Caller speech transcript (informational)
    #[serde(rename = "user_transcript")]
    UserTranscript {
        #[serde(rename = "user_transcription_event")]
        user_transcription_event: UserTranscriptionEvent,
    },

    /// Any event type this gateway does not consume
    #[serde(other)]
    Unknown,
}

/// Metadata from `conversation_initiation_metadata`.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiationMetadata {
    pub conversation_id: Option<String>,
    pub agent_output_audio_format: Option<String>,
}

/// Payload of an `audio` event.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    /// Base64-encoded agent audio
    pub audio_base_64: String,
    pub event_id: Option<u64>,
}

/// Payload of an `interruption` event.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptionEvent {
    pub reason: Option<String>,
    pub event_id: Option<u64>,
}

/// Payload of a `ping` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub event_id: Option<u64>,
    pub ping_ms: Option<u64>,
}

/// Payload of an `agent_response` event.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    pub agent_response: String,
}

/// Payload of a `user_transcript` event.
#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscriptionEvent {
    pub user_transcript: String,
}

/// Parse one inbound text frame into a typed agent event.
pub fn parse_agent_event(text: &str) -> Result<AgentEvent, serde_json::Error> {
    serde_json::from_str(text)
}
