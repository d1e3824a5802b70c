//! Configuration module for the VoiceBridge Gateway
//!
//! This module handles server configuration from environment variables and .env
//! files. Priority: actual ENV vars > .env values > defaults. Every relay tuning
//! knob (silence thresholds, chunk sizes, hold timers) is overridable so
//! deployments can adapt to carrier latency without rebuilding.
//!
//! # Example
//! ```rust,no_run
//! use voicebridge_gateway::config::ServerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables (after dotenvy has populated them)
//! let config = ServerConfig::from_env()?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use subtle::ConstantTimeEq;

use crate::core::upstream::UpstreamVariant;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Server configuration
///
/// Contains all configuration needed to run the VoiceBridge Gateway server, including:
/// - Server settings (host, port, public URL, TLS)
/// - Carrier (Twilio) credentials for outbound call placement
/// - Agent platform settings (API base, key, agent id, upstream variant)
/// - Relay tuning (silence thresholds, chunking, hold timers)
/// - Authentication settings
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL of this server (http or https).
    /// Used to build the TwiML stream URL and webhook callbacks handed to the carrier.
    pub public_url: String,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Carrier (Twilio) settings
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    /// E.164 caller id used as the From number on outbound calls
    pub twilio_from_number: String,
    /// Carrier REST API base, overridable for tests and mock servers
    pub twilio_api_base: String,

    // Agent platform settings
    /// Agent platform REST API base (signed-URL endpoint lives here)
    pub agent_api_base: String,
    pub agent_api_key: String,
    /// Identifier of the conversational agent to bridge calls to
    pub agent_id: String,
    /// Which upstream wiring to use: a direct agent WebSocket or the MCP bridge
    pub upstream_variant: UpstreamVariant,
    /// MCP bridge endpoint, required when `upstream_variant` is `McpBridge`
    pub mcp_bridge_url: Option<String>,
    pub mcp_bridge_api_key: Option<String>,

    // Conversation defaults (overridable per call via custom parameters)
    pub default_agent_prompt: Option<String>,
    pub default_greeting: Option<String>,
    pub agent_voice_id: Option<String>,

    // Relay tuning
    /// Silence threshold before the callee has spoken for the first time (ms)
    pub silence_initial_ms: u64,
    /// Silence threshold once the conversation is underway (ms)
    pub silence_conversation_ms: u64,
    /// Bytes of caller audio accumulated before a chunk is forwarded upstream
    pub chunk_threshold_bytes: usize,
    /// Upper bound on buffered caller audio while the upstream is still connecting
    pub max_pending_audio_bytes: usize,
    /// Deadline for the upstream WebSocket handshake (seconds)
    pub upstream_connect_timeout_secs: u64,
    /// Fallback hold duration in the instruction document, applied if the
    /// media stream ends without a hangup (seconds)
    pub max_hold_seconds: u64,
    /// Timeout for outbound REST requests (carrier API, credential exchange)
    pub http_request_timeout_secs: u64,

    // Authentication configuration
    pub auth_api_secrets: Vec<AuthApiSecret>,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent media stream WebSocket connections
    /// Default: None (unlimited)
    pub max_media_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 50
    pub max_connections_per_ip: u32,
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
/// This ensures sensitive data is cleared from memory immediately after use.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.twilio_auth_token.zeroize();
        self.agent_api_key.zeroize();
        if let Some(ref mut key) = self.mcp_bridge_api_key {
            key.zeroize();
        }
        for secret in &mut self.auth_api_secrets {
            secret.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads every knob from the process environment, applying defaults where a
    /// variable is unset. Note: the .env file is loaded in main.rs at application
    /// startup, so by the time this runs, .env values are already in the environment
    /// (with actual environment variables taking precedence over .env values).
    ///
    /// After loading, performs validation on the final configuration.
    ///
    /// # Returns
    /// * `Result<Self, Box<dyn std::error::Error>>` - The loaded configuration or an error
    ///
    /// # Errors
    /// Returns an error if:
    /// - A required variable (PUBLIC_URL, Twilio credentials, agent credentials) is missing
    /// - A numeric variable has an invalid format
    /// - Configuration validation fails (see [`ServerConfig::validate`])
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let host = env_or("HOST", "0.0.0.0");
        let port = env_parse("PORT", 8080_u16)?;
        let public_url = require_env("PUBLIC_URL")?;

        let tls = match (env_opt("TLS_CERT_PATH"), env_opt("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together or not at all".into(),
                );
            }
        };

        let upstream_variant = match env_opt("UPSTREAM_VARIANT") {
            Some(raw) => UpstreamVariant::parse(&raw)
                .ok_or_else(|| format!("Unknown UPSTREAM_VARIANT: {raw}"))?,
            None => UpstreamVariant::Direct,
        };

        let config = ServerConfig {
            host,
            port,
            public_url,
            tls,
            twilio_account_sid: require_env("TWILIO_ACCOUNT_SID")?,
            twilio_auth_token: require_env("TWILIO_AUTH_TOKEN")?,
            twilio_from_number: require_env("TWILIO_FROM_NUMBER")?,
            twilio_api_base: env_or("TWILIO_API_BASE", "https://api.twilio.com"),
            agent_api_base: env_or("AGENT_API_BASE", "https://api.elevenlabs.io"),
            agent_api_key: require_env("AGENT_API_KEY")?,
            agent_id: require_env("AGENT_ID")?,
            upstream_variant,
            mcp_bridge_url: env_opt("MCP_BRIDGE_URL"),
            mcp_bridge_api_key: env_opt("MCP_BRIDGE_API_KEY"),
            default_agent_prompt: env_opt("DEFAULT_AGENT_PROMPT"),
            default_greeting: env_opt("DEFAULT_AGENT_GREETING"),
            agent_voice_id: env_opt("AGENT_VOICE_ID"),
            silence_initial_ms: env_parse("SILENCE_INITIAL_MS", 2000_u64)?,
            silence_conversation_ms: env_parse("SILENCE_CONVERSATION_MS", 5000_u64)?,
            chunk_threshold_bytes: env_parse("CHUNK_THRESHOLD_BYTES", 1600_usize)?,
            max_pending_audio_bytes: env_parse("MAX_PENDING_AUDIO_BYTES", 65536_usize)?,
            upstream_connect_timeout_secs: env_parse("UPSTREAM_CONNECT_TIMEOUT_SECS", 10_u64)?,
            max_hold_seconds: env_parse("MAX_HOLD_SECONDS", 120_u64)?,
            http_request_timeout_secs: env_parse("HTTP_REQUEST_TIMEOUT_SECS", 30_u64)?,
            auth_api_secrets: match env_opt("AUTH_API_SECRETS") {
                Some(raw) => parse_auth_api_secrets(&raw)?,
                None => Vec::new(),
            },
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND", 60_u32)?,
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE", 10_u32)?,
            max_media_connections: match env_opt("MAX_MEDIA_CONNECTIONS") {
                Some(raw) => Some(
                    raw.parse::<usize>()
                        .map_err(|e| format!("Invalid MAX_MEDIA_CONNECTIONS: {e}"))?,
                ),
                None => None,
            },
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP", 50_u32)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the loaded configuration
    ///
    /// Checks cross-field constraints that cannot be expressed at parse time:
    /// - `public_url` must be an absolute http(s) URL
    /// - the MCP bridge variant requires `MCP_BRIDGE_URL` and `MCP_BRIDGE_API_KEY`
    /// - silence and chunking thresholds must be non-zero
    /// - the initial silence threshold cannot exceed the conversation threshold
    /// - the chunk threshold cannot exceed the pending-audio cap
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let parsed = url::Url::parse(&self.public_url)
            .map_err(|e| format!("Invalid PUBLIC_URL '{}': {e}", self.public_url))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!(
                "PUBLIC_URL must use http or https, got '{}'",
                parsed.scheme()
            )
            .into());
        }

        if self.upstream_variant == UpstreamVariant::McpBridge {
            if self.mcp_bridge_url.is_none() {
                return Err("MCP_BRIDGE_URL is required when UPSTREAM_VARIANT=mcp-bridge".into());
            }
            if self.mcp_bridge_api_key.is_none() {
                return Err(
                    "MCP_BRIDGE_API_KEY is required when UPSTREAM_VARIANT=mcp-bridge".into(),
                );
            }
        }

        if self.silence_initial_ms == 0 || self.silence_conversation_ms == 0 {
            return Err("Silence thresholds must be non-zero".into());
        }
        if self.silence_initial_ms > self.silence_conversation_ms {
            return Err(format!(
                "SILENCE_INITIAL_MS ({}) cannot exceed SILENCE_CONVERSATION_MS ({})",
                self.silence_initial_ms, self.silence_conversation_ms
            )
            .into());
        }

        if self.chunk_threshold_bytes == 0 {
            return Err("CHUNK_THRESHOLD_BYTES must be non-zero".into());
        }
        if self.chunk_threshold_bytes > self.max_pending_audio_bytes {
            return Err(format!(
                "CHUNK_THRESHOLD_BYTES ({}) cannot exceed MAX_PENDING_AUDIO_BYTES ({})",
                self.chunk_threshold_bytes, self.max_pending_audio_bytes
            )
            .into());
        }

        if self.upstream_connect_timeout_secs == 0 {
            return Err("UPSTREAM_CONNECT_TIMEOUT_SECS must be non-zero".into());
        }

        if self.http_request_timeout_secs == 0 {
            return Err("HTTP_REQUEST_TIMEOUT_SECS must be non-zero".into());
        }

        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    ///
    /// Returns true if TLS configuration is present
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if API secret authentication is configured
    ///
    /// Returns true if at least one API secret entry is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Find the API secret identifier that matches a bearer token
    ///
    /// Returns the configured id when the token matches a known secret.
    /// Comparison is constant-time; every configured secret is checked even
    /// after a match.
    pub fn find_api_secret_id(&self, token: &str) -> Option<&str> {
        let mut matched = None;
        for entry in &self.auth_api_secrets {
            if entry.secret.as_bytes().ct_eq(token.as_bytes()).unwrap_u8() == 1 && matched.is_none()
            {
                matched = Some(entry.id.as_str());
            }
        }
        matched
    }

    /// Build the WebSocket URL the carrier should open its media stream to
    ///
    /// Derives ws/wss from the public URL scheme and appends the media stream path.
    pub fn media_stream_url(&self) -> String {
        let ws_base = if self.public_url.starts_with("https://") {
            self.public_url.replacen("https://", "wss://", 1)
        } else {
            self.public_url.replacen("http://", "ws://", 1)
        };
        format!("{}/media-stream", ws_base.trim_end_matches('/'))
    }
}

/// Read an environment variable, treating empty or whitespace-only values as unset
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read an environment variable with a default
fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Read a required environment variable
fn require_env(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    env_opt(name).ok_or_else(|| format!("Missing required environment variable: {name}").into())
}

/// Read and parse a numeric environment variable with a default
fn env_parse<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw.parse::<T>().map_err(|e| format!("Invalid {name}: {e}").into()),
        None => Ok(default),
    }
}

/// Parse the AUTH_API_SECRETS environment variable
///
/// Accepts a comma-separated list of `id:secret` pairs, e.g.
/// `dialer:s3cret,crm:0ther`. The secret portion may itself contain colons.
pub(crate) fn parse_auth_api_secrets(
    raw: &str,
) -> Result<Vec<AuthApiSecret>, Box<dyn std::error::Error>> {
    let mut secrets = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (id, secret) = entry
            .split_once(':')
            .ok_or_else(|| format!("Invalid AUTH_API_SECRETS entry (expected id:secret): {entry}"))?;
        if id.trim().is_empty() || secret.trim().is_empty() {
            return Err(format!("AUTH_API_SECRETS entry has empty id or secret: {entry}").into());
        }
        secrets.push(AuthApiSecret {
            id: id.trim().to_string(),
            secret: secret.trim().to_string(),
        });
    }
    Ok(secrets)
}
