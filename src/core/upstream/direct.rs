//! Direct agent session: signed URL fetched straight from the voice-AI API.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::base::{UpstreamConfig, UpstreamError, UpstreamEvent, UpstreamResult, UpstreamSession};
use super::credentials::CredentialRequest;
use super::session::{ConnectProfile, SessionCore};
use crate::core::relay::silence::SilenceWindow;

/// Header carrying the agent API key on the credential exchange.
const API_KEY_HEADER: &str = "xi-api-key";

/// Session opened directly against the voice-AI API.
///
/// The credential exchange hits the API's signed-URL endpoint with the
/// long-lived API key; the returned socket URL embeds its own authorization,
/// so the WebSocket handshake carries no extra headers.
pub struct DirectSession {
    core: SessionCore,
}

impl DirectSession {
    pub fn new(
        config: UpstreamConfig,
        http: reqwest::Client,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> UpstreamResult<Self> {
        if config.api_key.is_empty() {
            return Err(UpstreamError::InvalidConfiguration(
                "Agent API key is required".to_string(),
            ));
        }
        if config.agent_id.is_empty() {
            return Err(UpstreamError::InvalidConfiguration(
                "Agent id is required".to_string(),
            ));
        }

        let profile = ConnectProfile {
            credential: CredentialRequest {
                endpoint: signed_url_endpoint(&config.api_base, &config.agent_id),
                api_key_header: API_KEY_HEADER,
                api_key: config.api_key.clone(),
                timeout: config.connect_timeout,
            },
            ws_api_key_header: None,
            label: "direct",
        };

        Ok(Self {
            core: SessionCore::new(config, profile, http, events),
        })
    }
}

#[async_trait]
impl UpstreamSession for DirectSession {
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

/// Signed-URL endpoint for an agent.
fn signed_url_endpoint(api_base: &str, agent_id: &str) -> String {
    format!(
        "{}/v1/convai/conversation/get-signed-url?agent_id={}",
        api_base.trim_end_matches('/'),
        agent_id
    )
}
