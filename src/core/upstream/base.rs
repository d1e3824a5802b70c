//! Base trait and types for upstream voice-AI sessions.
//!
//! An upstream session owns the full lifecycle of one voice-AI connection:
//! acquiring a short-lived credential, opening the WebSocket, sending the
//! initialization message, relaying audio and control messages, and closing.
//! Two variants implement the trait — a direct connection to the agent API and
//! a connection brokered through an MCP bridge — selected once at session
//! construction and never branched on mid-call.
//!
//! # Audio Format
//!
//! Sessions forward 8 kHz mu-law audio unchanged in both directions.

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Duration;

use crate::core::relay::silence::SilenceWindow;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during upstream session operations.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Credential fetch failed after exhausting retries
    #[error("Credential fetch failed: {0}")]
    CredentialFetch(String),

    /// The session WebSocket could not be opened
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The upstream sent something this gateway cannot parse
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The session variant is missing required configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for upstream session operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded exponential backoff for the credential fetch.
///
/// The credential fetch is the only retried operation in the relay: connection
/// opens and mid-call errors are fatal to the session, never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up.
    /// Default: 3
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds).
    /// Default: 1000ms
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay (milliseconds).
    /// Default: 30000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay after a given failed attempt using exponential
    /// backoff. Attempt numbers are 1-based; returns milliseconds.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        // Exponential backoff: base_delay * multiplier^(attempt-1)
        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        delay.min(self.max_delay_ms as f64) as u64
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Everything an upstream session needs to open and initialize itself.
///
/// Built per call by the media handler: server-level settings come from the
/// loaded configuration, prompt/greeting may be overridden by parameters
/// carried on the telephony `start` event.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Agent platform REST base (signed-URL endpoint)
    pub api_base: String,
    /// Agent platform API key
    pub api_key: String,
    /// Which conversational agent to bridge the call to
    pub agent_id: String,
    /// MCP bridge endpoint, used only by the bridge variant
    pub bridge_url: Option<String>,
    /// MCP bridge API key, used only by the bridge variant
    pub bridge_api_key: Option<String>,
    /// System prompt override for this call
    pub prompt: Option<String>,
    /// First message the agent speaks
    pub greeting: Option<String>,
    /// Voice override for this call
    pub voice_id: Option<String>,
    /// Deadline for the WebSocket open handshake
    pub connect_timeout: Duration,
    /// Credential fetch retry policy
    pub retry: RetryPolicy,
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by an upstream session to the relay driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// The session is open and initialized; audio may now be sent
    Ready,
    /// Agent audio, base64-encoded mu-law as carried on the telephony wire
    Audio(String),
    /// The agent was interrupted by caller speech
    Interruption,
    /// Agent response transcript (informational)
    AgentResponse(String),
    /// Caller speech transcript (informational)
    UserTranscript(String),
    /// The session could not be opened, or died of a protocol error
    Failed(String),
    /// The session socket closed
    Closed,
}

// =============================================================================
// Session Trait
// =============================================================================

/// One voice-AI session bound to one telephony call.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    /// Begin opening the session: credential fetch (with retry), WebSocket
    /// open, initialization message. Returns as soon as the open task is
    /// spawned; completion arrives on the event channel as
    /// [`UpstreamEvent::Ready`] or [`UpstreamEvent::Failed`].
    fn connect(&mut self);

    /// Forward one chunk of caller audio.
    ///
    /// Silently dropped when the session is not ready — buffering audio that
    /// cannot be sent yet is the relay session's job, not this one's.
    async fn send_audio(&self, audio: &[u8]) -> UpstreamResult<()>;

    /// Prompt the agent to speak after a period of caller silence.
    async fn notify_silence(&self, window: &SilenceWindow) -> UpstreamResult<()>;

    /// Close the session. Idempotent; safe when never opened; aborts an
    /// in-flight open, cancelling any pending credential fetch.
    async fn disconnect(&mut self) -> UpstreamResult<()>;

    /// Whether the session is open and initialized.
    fn is_ready(&self) -> bool;
}

/// Boxed session for dynamic dispatch over the two variants.
pub type BoxedUpstreamSession = Box<dyn UpstreamSession>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_delay_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_delay(1), 1000);
        assert_eq!(policy.calculate_delay(2), 2000);
        assert_eq!(policy.calculate_delay(3), 4000);
    }

    #[test]
    fn test_calculate_delay_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.calculate_delay(4), 5000);
        assert_eq!(policy.calculate_delay(9), 5000);
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
