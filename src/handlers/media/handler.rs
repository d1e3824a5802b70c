//! Telephony media-stream WebSocket handler
//!
//! This is the relay driver: it owns the sockets and timers for one call and
//! feeds typed events through the relay state machine, executing whatever
//! side-effect actions the machine returns. All lifecycle decisions live in
//! the machine; this module only does I/O.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::{
    Extension,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::core::relay::session::{RelayAction, RelayEvent, RelaySession};
use crate::core::relay::silence::SilenceDetector;
use crate::core::telephony::stream::{TelephonyCommand, TelephonyEvent, parse_telephony_event};
use crate::core::upstream::{
    BoxedUpstreamSession, RetryPolicy, UpstreamConfig, UpstreamEvent, create_upstream_session,
};
use crate::middleware::connection_limit::ClientIp;
use crate::state::AppState;

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long to wait for the sender task to flush a close frame
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Routes for messages flowing back to the telephony socket
enum TelephonyRoute {
    /// A serialized media or clear command
    Command(TelephonyCommand),
    /// Close the socket and stop the sender task, signalling `delivered` once
    /// the close frame has been flushed
    Close {
        reason: Option<String>,
        delivered: oneshot::Sender<()>,
    },
}

/// Media-stream WebSocket handler
///
/// Upgrades the carrier's HTTP request to a WebSocket and runs the relay for
/// the duration of the call.
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `state` - Application state containing configuration
/// * `client_ip` - Connection-limit slot injected by middleware, released on teardown
///
/// # Returns
/// * `Response` - HTTP response that upgrades the connection to WebSocket
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    info!("Media stream connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            handle_media_socket(socket, state, client_ip.map(|Extension(ip)| ip))
        })
}

/// Run the relay for one media-stream connection
async fn handle_media_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    client_ip: Option<ClientIp>,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, "Media stream connected");

    let (mut sender, mut receiver) = socket.split();
    let (command_tx, mut command_rx) = mpsc::channel::<TelephonyRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing telephony commands
    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = command_rx.recv().await {
            let result = match route {
                TelephonyRoute::Command(command) => match serde_json::to_string(&command) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize telephony command: {}", e);
                        continue;
                    }
                },
                TelephonyRoute::Close { reason, delivered } => {
                    debug!("Closing media stream socket");
                    let frame = reason.map(|reason| CloseFrame {
                        code: close_code::ERROR,
                        reason: reason.into(),
                    });
                    let _ = sender.send(Message::Close(frame)).await;
                    let _ = delivered.send(());
                    break;
                }
            };

            if let Err(e) = result {
                error!("Failed to send telephony command: {}", e);
                break;
            }
        }
    });

    let (upstream_tx, mut upstream_rx) = mpsc::channel::<UpstreamEvent>(CHANNEL_BUFFER_SIZE);

    let mut machine = RelaySession::new(
        session_id.clone(),
        app_state.config.chunk_threshold_bytes,
        app_state.config.max_pending_audio_bytes,
    );
    let mut silence = SilenceDetector::new(
        Duration::from_millis(app_state.config.silence_initial_ms),
        Duration::from_millis(app_state.config.silence_conversation_ms),
    );
    let mut upstream: Option<BoxedUpstreamSession> = None;
    let mut pending: VecDeque<RelayEvent> = VecDeque::new();
    let mut telephony_socket_open = true;

    loop {
        // Run every queued event through the machine before touching I/O;
        // executed actions may enqueue follow-up events
        while let Some(event) = pending.pop_front() {
            for action in machine.handle(event) {
                if let Some(follow_up) = execute_action(
                    action,
                    &machine,
                    &mut upstream,
                    &mut silence,
                    &command_tx,
                    &upstream_tx,
                    &app_state,
                )
                .await
                {
                    pending.push_back(follow_up);
                }
            }
        }

        if machine.state().is_terminal() {
            break;
        }

        select! {
            frame = receiver.next(), if telephony_socket_open => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match parse_telephony_event(&text) {
                            Ok(event) => {
                                if let Some(relay_event) = map_telephony_event(event, &session_id) {
                                    pending.push_back(relay_event);
                                }
                            }
                            Err(e) => {
                                warn!(session_id = %session_id, "Discarding malformed telephony event: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(session_id = %session_id, "Media stream closed by carrier");
                        telephony_socket_open = false;
                        pending.push_back(RelayEvent::TelephonyClosed);
                    }
                    Some(Ok(_)) => {
                        // Binary, ping and pong frames carry nothing for the relay
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "Media stream socket error: {}", e);
                        telephony_socket_open = false;
                        pending.push_back(RelayEvent::TelephonyClosed);
                    }
                    None => {
                        info!(session_id = %session_id, "Media stream disconnected");
                        telephony_socket_open = false;
                        pending.push_back(RelayEvent::TelephonyClosed);
                    }
                }
            }

            Some(event) = upstream_rx.recv() => {
                if let Some(relay_event) = map_upstream_event(event, &session_id) {
                    pending.push_back(relay_event);
                }
            }

            _ = silence_wait(silence.deadline()) => {
                if let Some(window) = silence.fire() {
                    debug!(
                        session_id = %session_id,
                        threshold_ms = window.threshold.as_millis() as u64,
                        first_turn = window.is_first_turn,
                        "Silence deadline elapsed"
                    );
                    pending.push_back(RelayEvent::SilenceElapsed(window));
                }
            }
        }
    }

    // Let the sender task drain queued frames before the socket is dropped
    drop(command_tx);
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }

    if let Some(mut session) = upstream.take()
        && let Err(e) = session.disconnect().await
    {
        error!(session_id = %session_id, "Failed to disconnect upstream session: {:?}", e);
    }

    if let Some(ClientIp(ip)) = client_ip {
        app_state.release_connection(ip);
    }

    info!(
        session_id = %session_id,
        state = %machine.state(),
        call_sid = ?machine.call_sid(),
        "Media stream terminated"
    );
}

/// Execute one side-effect action from the machine.
///
/// Returns a follow-up event for the machine when the action's outcome needs
/// to feed back into it (closure confirmations, synchronous failures).
#[allow(clippy::too_many_arguments)]
async fn execute_action(
    action: RelayAction,
    machine: &RelaySession,
    upstream: &mut Option<BoxedUpstreamSession>,
    silence: &mut SilenceDetector,
    command_tx: &mpsc::Sender<TelephonyRoute>,
    upstream_tx: &mpsc::Sender<UpstreamEvent>,
    app_state: &Arc<AppState>,
) -> Option<RelayEvent> {
    match action {
        RelayAction::ConnectUpstream => {
            let upstream_config = build_upstream_config(machine, app_state);
            match create_upstream_session(
                app_state.config.upstream_variant,
                upstream_config,
                app_state.http_client.clone(),
                upstream_tx.clone(),
            ) {
                Ok(mut session) => {
                    info!(
                        session_id = %machine.session_id(),
                        variant = %app_state.config.upstream_variant,
                        "Opening upstream session"
                    );
                    session.connect();
                    *upstream = Some(session);
                    None
                }
                Err(e) => Some(RelayEvent::UpstreamFailed(e.to_string())),
            }
        }

        RelayAction::SendUpstreamAudio(audio) => {
            if let Some(session) = upstream.as_ref() {
                if let Err(e) = session.send_audio(&audio).await {
                    debug!(session_id = %machine.session_id(), "Upstream audio send failed: {}", e);
                }
            } else {
                debug!(session_id = %machine.session_id(), "No upstream session, dropping audio chunk");
            }
            None
        }

        RelayAction::NotifySilence(window) => {
            if let Some(session) = upstream.as_ref()
                && let Err(e) = session.notify_silence(&window).await
            {
                debug!(session_id = %machine.session_id(), "Silence prompt send failed: {}", e);
            }
            None
        }

        RelayAction::SendTelephony(command) => {
            if command_tx.send(TelephonyRoute::Command(command)).await.is_err() {
                // Sender task is gone, the socket is as good as closed
                Some(RelayEvent::TelephonyClosed)
            } else {
                None
            }
        }

        RelayAction::ArmSilence => {
            silence.arm(Instant::now());
            None
        }

        RelayAction::ResetSilence => {
            silence.on_audio_received(Instant::now());
            None
        }

        RelayAction::CancelSilence => {
            silence.cancel();
            None
        }

        RelayAction::CloseTelephony { reason } => {
            if let Some(reason) = reason.as_deref() {
                warn!(session_id = %machine.session_id(), reason = %reason, "Closing media stream after failure");
            }
            let (delivered_tx, delivered) = oneshot::channel();
            if command_tx
                .send(TelephonyRoute::Close {
                    reason,
                    delivered: delivered_tx,
                })
                .await
                .is_ok()
            {
                // Closure is confirmed only once the close frame is on the wire
                let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, delivered).await;
            }
            Some(RelayEvent::TelephonyClosed)
        }

        RelayAction::CloseUpstream => {
            if let Some(mut session) = upstream.take()
                && let Err(e) = session.disconnect().await
            {
                error!(session_id = %machine.session_id(), "Upstream disconnect failed: {:?}", e);
            }
            Some(RelayEvent::UpstreamClosed)
        }
    }
}

/// Build the upstream session configuration for this call.
///
/// Per-call prompt and greeting parameters from the start event take
/// precedence over the configured defaults.
fn build_upstream_config(machine: &RelaySession, app_state: &Arc<AppState>) -> UpstreamConfig {
    let config = &app_state.config;
    UpstreamConfig {
        api_base: config.agent_api_base.clone(),
        api_key: config.agent_api_key.clone(),
        agent_id: config.agent_id.clone(),
        bridge_url: config.mcp_bridge_url.clone(),
        bridge_api_key: config.mcp_bridge_api_key.clone(),
        prompt: machine
            .prompt_override()
            .map(str::to_string)
            .or_else(|| config.default_agent_prompt.clone()),
        greeting: machine
            .greeting_override()
            .map(str::to_string)
            .or_else(|| config.default_greeting.clone()),
        voice_id: config.agent_voice_id.clone(),
        connect_timeout: Duration::from_secs(config.upstream_connect_timeout_secs),
        retry: RetryPolicy::default(),
    }
}

/// Translate one parsed telephony event into a machine event.
fn map_telephony_event(event: TelephonyEvent, session_id: &str) -> Option<RelayEvent> {
    match event {
        TelephonyEvent::Connected { protocol, .. } => {
            debug!(session_id = %session_id, protocol = ?protocol, "Media stream handshake complete");
            None
        }

        TelephonyEvent::Start { start, .. } => {
            debug!(
                session_id = %session_id,
                tracks = ?start.tracks,
                "Start event parsed"
            );
            Some(RelayEvent::Started(start))
        }

        TelephonyEvent::Media { media, .. } => {
            if !media.is_inbound() {
                return None;
            }
            match media.decode() {
                Ok(audio) => Some(RelayEvent::InboundAudio(audio)),
                Err(e) => {
                    warn!(session_id = %session_id, "Discarding undecodable media frame: {}", e);
                    None
                }
            }
        }

        TelephonyEvent::Stop { .. } => {
            info!(session_id = %session_id, "Media stream stop received");
            Some(RelayEvent::StopReceived)
        }

        TelephonyEvent::Unknown => {
            debug!(session_id = %session_id, "Ignoring unrecognized telephony event");
            None
        }
    }
}

/// Translate one upstream event into a machine event.
///
/// Transcript events are informational; they are logged here and never reach
/// the machine.
fn map_upstream_event(event: UpstreamEvent, session_id: &str) -> Option<RelayEvent> {
    match event {
        UpstreamEvent::Ready => Some(RelayEvent::UpstreamReady),
        UpstreamEvent::Audio(payload) => Some(RelayEvent::UpstreamAudio(payload)),
        UpstreamEvent::Interruption => Some(RelayEvent::UpstreamInterruption),
        UpstreamEvent::Failed(reason) => Some(RelayEvent::UpstreamFailed(reason)),
        UpstreamEvent::Closed => Some(RelayEvent::UpstreamClosed),
        UpstreamEvent::AgentResponse(text) => {
            info!(session_id = %session_id, transcript = %text, "Agent response");
            None
        }
        UpstreamEvent::UserTranscript(text) => {
            info!(session_id = %session_id, transcript = %text, "Caller transcript");
            None
        }
    }
}

/// Sleep until the silence deadline, or forever when the detector is idle.
async fn silence_wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
