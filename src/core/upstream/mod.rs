//! Voice-AI upstream session management.
//!
//! This module owns the companion connection to the conversational agent:
//! credential exchange, WebSocket lifecycle, and the message protocol.
//!
//! # Variants
//!
//! - **Direct** - signed session URL fetched straight from the voice-AI API
//! - **MCP bridge** - session URL issued by a broker that wraps the agent
//!   with external tool access
//!
//! Both expose the same [`UpstreamSession`] interface; the variant is chosen
//! once at session construction and never branched on mid-call.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio::sync::mpsc;
//! use voicebridge_gateway::core::upstream::{
//!     UpstreamConfig, UpstreamVariant, create_upstream_session,
//! };
//!
//! let (events_tx, mut events_rx) = mpsc::channel(1024);
//! let mut session = create_upstream_session(
//!     UpstreamVariant::Direct,
//!     config,
//!     http_client,
//!     events_tx,
//! )?;
//! session.connect();
//! // UpstreamEvent::Ready or UpstreamEvent::Failed arrives on events_rx
//! ```

mod base;
pub mod bridge;
pub mod credentials;
pub mod direct;
pub mod messages;
mod session;

use tokio::sync::mpsc;

pub use base::{
    BoxedUpstreamSession, RetryPolicy, UpstreamConfig, UpstreamError, UpstreamEvent,
    UpstreamResult, UpstreamSession,
};
pub use bridge::BridgeSession;
pub use credentials::{CredentialRequest, UpstreamCredential, fetch_credential};
pub use direct::DirectSession;
pub use messages::{AgentEvent, AgentMessage, parse_agent_event};

/// Supported upstream wirings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamVariant {
    /// Signed session URL fetched directly from the voice-AI API
    Direct,
    /// Session URL issued by the MCP bridge broker
    McpBridge,
}

impl UpstreamVariant {
    /// Parse variant from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "direct" => Some(UpstreamVariant::Direct),
            "mcp-bridge" | "mcp_bridge" | "bridge" => Some(UpstreamVariant::McpBridge),
            _ => None,
        }
    }
}

impl std::fmt::Display for UpstreamVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamVariant::Direct => write!(f, "direct"),
            UpstreamVariant::McpBridge => write!(f, "mcp-bridge"),
        }
    }
}

/// Create an upstream session for the selected variant.
///
/// Session events are delivered on `events`; the session does not open until
/// [`UpstreamSession::connect`] is called.
pub fn create_upstream_session(
    variant: UpstreamVariant,
    config: UpstreamConfig,
    http: reqwest::Client,
    events: mpsc::Sender<UpstreamEvent>,
) -> UpstreamResult<BoxedUpstreamSession> {
    match variant {
        UpstreamVariant::Direct => Ok(Box::new(DirectSession::new(config, http, events)?)),
        UpstreamVariant::McpBridge => Ok(Box::new(BridgeSession::new(config, http, events)?)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn test_config() -> UpstreamConfig {
        UpstreamConfig {
            api_base: "https://api.elevenlabs.io".to_string(),
            api_key: "agent-key".to_string(),
            agent_id: "agent-1".to_string(),
            bridge_url: None,
            bridge_api_key: None,
            prompt: None,
            greeting: None,
            voice_id: None,
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!(UpstreamVariant::parse("direct"), Some(UpstreamVariant::Direct));
        assert_eq!(UpstreamVariant::parse("DIRECT"), Some(UpstreamVariant::Direct));
        assert_eq!(
            UpstreamVariant::parse("mcp-bridge"),
            Some(UpstreamVariant::McpBridge)
        );
        assert_eq!(
            UpstreamVariant::parse("mcp_bridge"),
            Some(UpstreamVariant::McpBridge)
        );
        assert_eq!(
            UpstreamVariant::parse("bridge"),
            Some(UpstreamVariant::McpBridge)
        );
        assert_eq!(UpstreamVariant::parse("invalid"), None);
    }

    #[test]
    fn test_variant_display() {
        assert_eq!(UpstreamVariant::Direct.to_string(), "direct");
        assert_eq!(UpstreamVariant::McpBridge.to_string(), "mcp-bridge");
    }

    #[tokio::test]
    async fn test_create_direct_session() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let result = create_upstream_session(
            UpstreamVariant::Direct,
            test_config(),
            reqwest::Client::new(),
            events_tx,
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_create_bridge_session_requires_bridge_config() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let result = create_upstream_session(
            UpstreamVariant::McpBridge,
            test_config(),
            reqwest::Client::new(),
            events_tx,
        );
        assert!(matches!(
            result.err(),
            Some(UpstreamError::InvalidConfiguration(_))
        ));
    }
}
