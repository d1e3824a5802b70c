//! MCP bridge session: the socket URL is issued by a broker that wraps the
//! voice agent with external tool access.
//!
//! The bridge speaks the same session protocol as the direct API; only the
//! credential exchange and handshake authorization differ. The bridge issues
//! socket URLs from its own `/session` endpoint and expects its API key on
//! both the exchange and the WebSocket handshake.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::base::{UpstreamConfig, UpstreamError, UpstreamEvent, UpstreamResult, UpstreamSession};
use super::credentials::CredentialRequest;
use super::session::{ConnectProfile, SessionCore};
use crate::core::relay::silence::SilenceWindow;

/// Header carrying the bridge API key.
const API_KEY_HEADER: &str = "x-api-key";

/// Session brokered through the MCP bridge.
pub struct BridgeSession {
    core: SessionCore,
}

impl BridgeSession {
    pub fn new(
        config: UpstreamConfig,
        http: reqwest::Client,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> UpstreamResult<Self> {
        let bridge_url = config
            .bridge_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                UpstreamError::InvalidConfiguration(
                    "Bridge URL is required for the mcp-bridge variant".to_string(),
                )
            })?;
        let bridge_api_key = config
            .bridge_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                UpstreamError::InvalidConfiguration(
                    "Bridge API key is required for the mcp-bridge variant".to_string(),
                )
            })?;
        if config.agent_id.is_empty() {
            return Err(UpstreamError::InvalidConfiguration(
                "Agent id is required".to_string(),
            ));
        }

        let profile = ConnectProfile {
            credential: CredentialRequest {
                endpoint: session_endpoint(&bridge_url, &config.agent_id),
                api_key_header: API_KEY_HEADER,
                api_key: bridge_api_key.clone(),
                timeout: config.connect_timeout,
            },
            ws_api_key_header: Some((API_KEY_HEADER, bridge_api_key)),
            label: "mcp-bridge",
        };

        Ok(Self {
            core: SessionCore::new(config, profile, http, events),
        })
    }
}

#[async_trait]
impl UpstreamSession for BridgeSession {
    fn connect(&mut self) {
        self.core.connect();
    }

    async fn send_audio(&self, audio: &[u8]) -> UpstreamResult<()> {
        self.core.send_audio(audio).await
    }

    async fn notify_silence(&self, window: &SilenceWindow) -> UpstreamResult<()> {
        self.core.notify_silence(window).await
    }

    async fn disconnect(&mut self) -> UpstreamResult<()> {
        self.core.disconnect().await
    }

    fn is_ready(&self) -> bool {
        self.core.is_ready()
    }
}

/// Session-issue endpoint on the bridge.
fn session_endpoint(bridge_url: &str, agent_id: &str) -> String {
    format!(
        "{}/session?agent_id={}",
        bridge_url.trim_end_matches('/'),
        agent_id
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::upstream::base::RetryPolicy;

    fn test_config() -> UpstreamConfig {
        UpstreamConfig {
            api_base: "https://api.elevenlabs.io".to_string(),
            api_key: "agent-key".to_string(),
            agent_id: "agent-1".to_string(),
            bridge_url: Some("https://bridge.example.com".to_string()),
            bridge_api_key: Some("bridge-key".to_string()),
            prompt: None,
            greeting: None,
            voice_id: None,
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn test_session_endpoint() {
        assert_eq!(
            session_endpoint("https://bridge.example.com", "agent-1"),
            "https://bridge.example.com/session?agent_id=agent-1"
        );
        assert_eq!(
            session_endpoint("https://bridge.example.com/", "agent-1"),
            "https://bridge.example.com/session?agent_id=agent-1"
        );
    }

    #[tokio::test]
    async fn test_new_requires_bridge_url() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let config = UpstreamConfig {
            bridge_url: None,
            ..test_config()
        };

        let result = BridgeSession::new(config, reqwest::Client::new(), events_tx);
        assert!(matches!(
            result.err(),
            Some(UpstreamError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_new_requires_bridge_api_key() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let config = UpstreamConfig {
            bridge_api_key: Some(String::new()),
            ..test_config()
        };

        let result = BridgeSession::new(config, reqwest::Client::new(), events_tx);
        assert!(matches!(
            result.err(),
            Some(UpstreamError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_new_session_starts_not_ready() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let session = BridgeSession::new(test_config(), reqwest::Client::new(), events_tx).unwrap();
        assert!(!session.is_ready());
    }
}
