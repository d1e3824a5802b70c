//! Shared session engine behind both upstream variants.
//!
//! [`SessionCore`] owns the full lifecycle of one agent WebSocket: the
//! credential exchange, the handshake, the initialization message, and the
//! bidirectional pump task. The [`super::direct::DirectSession`] and
//! [`super::bridge::BridgeSession`] wrappers differ only in the
//! [`ConnectProfile`] they construct.
//!
//! # Thread Safety
//!
//! Mutable state shared with the spawned pump task uses `Arc` wrappers; the
//! `ready` flag uses `Arc<AtomicBool>` for lock-free status checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::base::{UpstreamConfig, UpstreamError, UpstreamEvent, UpstreamResult};
use super::credentials::{CredentialRequest, fetch_credential};
use super::messages::{AgentEvent, AgentMessage, parse_agent_event};
use crate::core::relay::silence::SilenceWindow;

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Consecutive unparseable text frames tolerated before the session is
/// declared dead.
const MAX_CONSECUTIVE_PARSE_FAILURES: u32 = 5;

/// Silence prompt used before the caller has spoken at all.
const INITIAL_SILENCE_PROMPT: &str =
    "The caller has connected but has not spoken yet. Greet them and ask how you can help.";

/// Silence prompt once the conversation is underway.
const CONVERSATION_SILENCE_PROMPT: &str =
    "The caller has been silent for a while. Gently check in and keep the conversation going.";

// =============================================================================
// Connect Profile
// =============================================================================

/// Variant-specific connection parameters.
#[derive(Debug, Clone)]
pub(crate) struct ConnectProfile {
    /// Credential exchange parameters
    pub credential: CredentialRequest,
    /// Extra header for the WebSocket handshake, when the variant needs one
    pub ws_api_key_header: Option<(&'static str, String)>,
    /// Variant name for logs
    pub label: &'static str,
}

// =============================================================================
// Session Core
// =============================================================================

/// Engine for one agent session socket.
///
/// `connect` spawns the pump task and returns immediately; the outcome and
/// all subsequent traffic arrive on the event channel supplied at
/// construction. The session is one-shot: once the pump task ends the core
/// is spent and a new session must be created for the next call.
pub(crate) struct SessionCore {
    config: UpstreamConfig,
    profile: ConnectProfile,
    http: reqwest::Client,
    events: mpsc::Sender<UpstreamEvent>,
    /// Open-and-initialized flag, shared with the pump task
    ready: Arc<AtomicBool>,
    /// Set by `disconnect` to suppress the Closed event
    intentional_disconnect: Arc<AtomicBool>,
    /// Outgoing message channel, present while the pump task runs
    ws_sender: Arc<Mutex<Option<mpsc::Sender<AgentMessage>>>>,
    /// Pump task handle
    connection_handle: Option<JoinHandle<()>>,
}

impl SessionCore {
    pub(crate) fn new(
        config: UpstreamConfig,
        profile: ConnectProfile,
        http: reqwest::Client,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> Self {
        Self {
            config,
            profile,
            http,
            events,
            ready: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            connection_handle: None,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Spawn the session task: credential fetch, handshake, initialization,
    /// then the message pump. Repeated calls while a task exists are no-ops.
    pub(crate) fn connect(&mut self) {
        if self.connection_handle.is_some() {
            tracing::debug!("Upstream connect requested but a session task already exists");
            return;
        }
        self.intentional_disconnect.store(false, Ordering::SeqCst);

        let config = self.config.clone();
        let credential_request = self.profile.credential.clone();
        let ws_api_key_header = self.profile.ws_api_key_header.clone();
        let label = self.profile.label;
        let http = self.http.clone();
        let events = self.events.clone();
        let ready = self.ready.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();
        let ws_sender = self.ws_sender.clone();

        let handle = tokio::spawn(async move {
            let credential =
                match fetch_credential(&http, &credential_request, &config.retry).await {
                    Ok(credential) => credential,
                    Err(e) => {
                        emit(&events, UpstreamEvent::Failed(e.to_string())).await;
                        return;
                    }
                };

            let request =
                match build_ws_request(&credential.socket_url, ws_api_key_header.as_ref()) {
                    Ok(request) => request,
                    Err(e) => {
                        emit(&events, UpstreamEvent::Failed(e.to_string())).await;
                        return;
                    }
                };

            let ws_stream = match tokio::time::timeout(
                config.connect_timeout,
                tokio_tungstenite::connect_async(request),
            )
            .await
            {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    emit(&events, UpstreamEvent::Failed(format!("WebSocket connect failed: {e}"))).await;
                    return;
                }
                Err(_) => {
                    emit(
                        &events,
                        UpstreamEvent::Failed(format!(
                            "WebSocket connect timed out after {:?}",
                            config.connect_timeout
                        )),
                    )
                    .await;
                    return;
                }
            };

            tracing::info!(variant = label, "Connected to agent session socket");

            let (mut ws_sink, mut ws_stream) = ws_stream.split();

            // Initialization must be the first message on the wire
            let init = AgentMessage::init(
                config.prompt.as_deref(),
                config.greeting.as_deref(),
                config.voice_id.as_deref(),
            );
            match serde_json::to_string(&init) {
                Ok(json) => {
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        emit(
                            &events,
                            UpstreamEvent::Failed(format!("Failed to send initialization: {e}")),
                        )
                        .await;
                        return;
                    }
                }
                Err(e) => {
                    emit(
                        &events,
                        UpstreamEvent::Failed(format!("Failed to serialize initialization: {e}")),
                    )
                    .await;
                    return;
                }
            }

            let (tx, mut rx) = mpsc::channel::<AgentMessage>(WS_CHANNEL_CAPACITY);
            *ws_sender.lock().await = Some(tx);
            ready.store(true, Ordering::SeqCst);

            if events.send(UpstreamEvent::Ready).await.is_err() {
                ready.store(false, Ordering::SeqCst);
                *ws_sender.lock().await = None;
                return;
            }

            let mut consecutive_parse_failures: u32 = 0;
            let mut session_failed = false;

            loop {
                tokio::select! {
                    // Outgoing messages from the relay
                    Some(message) = rx.recv() => {
                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize agent message: {}", e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send agent message: {}", e);
                            session_failed = true;
                            emit(&events, UpstreamEvent::Failed(format!("WebSocket send failed: {e}"))).await;
                            break;
                        }
                    }

                    // Incoming frames from the agent
                    Some(frame) = ws_stream.next() => {
                        match frame {
                            Ok(Message::Text(text)) => {
                                match parse_agent_event(&text) {
                                    Ok(AgentEvent::Ping { ping_event }) => {
                                        consecutive_parse_failures = 0;
                                        let event_id = ping_event.and_then(|p| p.event_id);
                                        let pong = AgentMessage::pong(event_id);
                                        if let Ok(json) = serde_json::to_string(&pong)
                                            && let Err(e) = ws_sink.send(Message::Text(json.into())).await
                                        {
                                            tracing::error!("Failed to send pong: {}", e);
                                        }
                                    }
                                    Ok(event) => {
                                        consecutive_parse_failures = 0;
                                        if !dispatch_agent_event(event, &events).await {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        consecutive_parse_failures += 1;
                                        tracing::warn!(
                                            consecutive = consecutive_parse_failures,
                                            "Failed to parse agent event: {}",
                                            e
                                        );
                                        if consecutive_parse_failures >= MAX_CONSECUTIVE_PARSE_FAILURES {
                                            session_failed = true;
                                            emit(&events, UpstreamEvent::Failed(format!(
                                                "{MAX_CONSECUTIVE_PARSE_FAILURES} consecutive unparseable agent messages"
                                            ))).await;
                                            break;
                                        }
                                    }
                                }
                            }
                            Ok(Message::Binary(data)) => {
                                // Some agent deployments stream audio as raw binary frames
                                consecutive_parse_failures = 0;
                                let encoded = BASE64_STANDARD.encode(&data);
                                if events.send(UpstreamEvent::Audio(encoded)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Message::Close(_)) => {
                                tracing::info!("Agent session socket closed by server");
                                break;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Err(e) => {
                                tracing::error!("Agent session socket error: {}", e);
                                session_failed = true;
                                emit(&events, UpstreamEvent::Failed(format!("WebSocket error: {e}"))).await;
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            ready.store(false, Ordering::SeqCst);
            *ws_sender.lock().await = None;

            if !session_failed && !intentional_disconnect.load(Ordering::SeqCst) {
                emit(&events, UpstreamEvent::Closed).await;
            }
            tracing::info!(variant = label, "Agent session task ended");
        });

        self.connection_handle = Some(handle);
    }

    /// Forward one chunk of caller audio. Dropped with a debug log when the
    /// session is not ready; the relay buffers pre-ready audio itself.
    pub(crate) async fn send_audio(&self, audio: &[u8]) -> UpstreamResult<()> {
        if !self.is_ready() {
            tracing::debug!(bytes = audio.len(), "Dropping caller audio, session not ready");
            return Ok(());
        }
        self.send_message(AgentMessage::audio(audio)).await
    }

    /// Send the silence prompt matching the window's turn position.
    pub(crate) async fn notify_silence(&self, window: &SilenceWindow) -> UpstreamResult<()> {
        if !self.is_ready() {
            tracing::debug!("Dropping silence prompt, session not ready");
            return Ok(());
        }
        let text = if window.is_first_turn {
            INITIAL_SILENCE_PROMPT
        } else {
            CONVERSATION_SILENCE_PROMPT
        };
        self.send_message(AgentMessage::contextual_update(text)).await
    }

    /// Close the session. Idempotent; aborts an in-flight open, which also
    /// cancels a pending credential fetch.
    pub(crate) async fn disconnect(&mut self) -> UpstreamResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        *self.ws_sender.lock().await = None;

        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
            tracing::info!(variant = self.profile.label, "Disconnected from agent session");
        }

        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Send a message to the pump task.
    async fn send_message(&self, message: AgentMessage) -> UpstreamResult<()> {
        if let Some(sender) = self.ws_sender.lock().await.as_ref() {
            sender
                .send(message)
                .await
                .map_err(|_| UpstreamError::NotConnected)?;
            Ok(())
        } else {
            Err(UpstreamError::NotConnected)
        }
    }
}

/// Send an event to the relay driver, tolerating a dropped receiver.
async fn emit(events: &mpsc::Sender<UpstreamEvent>, event: UpstreamEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("Relay driver dropped the upstream event channel");
    }
}

/// Forward one parsed agent event to the relay driver.
///
/// Returns `false` when the driver has dropped its receiver and the pump
/// task should stop.
async fn dispatch_agent_event(event: AgentEvent, events: &mpsc::Sender<UpstreamEvent>) -> bool {
    let forwarded = match event {
        AgentEvent::Audio { audio_event } => {
            events
                .send(UpstreamEvent::Audio(audio_event.audio_base_64))
                .await
        }

        AgentEvent::Interruption { .. } => events.send(UpstreamEvent::Interruption).await,

        AgentEvent::AgentResponse {
            agent_response_event,
        } => {
            events
                .send(UpstreamEvent::AgentResponse(
                    agent_response_event.agent_response,
                ))
                .await
        }

        AgentEvent::UserTranscript {
            user_transcription_event,
        } => {
            events
                .send(UpstreamEvent::UserTranscript(
                    user_transcription_event.user_transcript,
                ))
                .await
        }

        AgentEvent::ConversationInitiationMetadata { metadata } => {
            tracing::debug!(
                conversation_id = ?metadata.conversation_id,
                "Agent conversation initialized"
            );
            return true;
        }

        // Answered inline by the pump task, which owns the sink
        AgentEvent::Ping { .. } => return true,

        AgentEvent::Unknown => {
            tracing::trace!("Unhandled agent event");
            return true;
        }
    };

    forwarded.is_ok()
}

/// Build the WebSocket handshake request for a signed socket URL.
fn build_ws_request(
    socket_url: &str,
    api_key_header: Option<&(&'static str, String)>,
) -> UpstreamResult<http::Request<()>> {
    let parsed = url::Url::parse(socket_url)
        .map_err(|e| UpstreamError::Connect(format!("Invalid socket URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| UpstreamError::Connect("Socket URL has no host".to_string()))?;
    let host_header = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut builder = http::Request::builder()
        .uri(socket_url)
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host_header);

    if let Some((name, value)) = api_key_header {
        builder = builder.header(*name, value);
    }

    builder
        .body(())
        .map_err(|e| UpstreamError::Connect(format!("Failed to build handshake request: {e}")))
}

// =============================================================================
// Tests
// =============================================================================
