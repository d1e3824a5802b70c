//! Relay session lifecycle state machine
//!
//! One [`RelaySession`] orchestrates a single telephony call: it consumes
//! typed events from the media-stream socket, the upstream voice-AI session,
//! and the silence detector, and returns typed [`RelayAction`]s for the driver
//! to execute. The struct performs no I/O itself — every transition is a plain
//! function over {current state, event}, which keeps the full lifecycle
//! testable without sockets.
//!
//! Lifecycle: `AwaitingStart → AwaitingFirstAudio → ConnectingUpstream →
//! Streaming → Closing → Closed`, with `Failed` as a second terminal state for
//! upstream setup failures. The upstream connection is deliberately deferred
//! until the first caller audio frame arrives, so calls that never produce
//! audio never open a paid agent session.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::core::relay::silence::SilenceWindow;
use crate::core::telephony::stream::{StartMetadata, TelephonyCommand};

// =============================================================================
// States
// =============================================================================

/// Lifecycle phase of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    /// Socket open, waiting for the carrier's `start` event
    #[default]
    AwaitingStart,
    /// Call metadata recorded, waiting for the first caller audio frame
    AwaitingFirstAudio,
    /// Upstream session being opened; caller audio is buffered
    ConnectingUpstream,
    /// Both sides open, audio flowing in both directions
    Streaming,
    /// Teardown in progress, waiting for both sides to confirm closure
    Closing,
    /// Terminal: both sides closed cleanly
    Closed,
    /// Terminal: upstream setup failed, telephony closed with an error
    Failed,
}

impl RelayState {
    /// Whether the session has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayState::Closed | RelayState::Failed)
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelayState::AwaitingStart => "awaiting_start",
            RelayState::AwaitingFirstAudio => "awaiting_first_audio",
            RelayState::ConnectingUpstream => "connecting_upstream",
            RelayState::Streaming => "streaming",
            RelayState::Closing => "closing",
            RelayState::Closed => "closed",
            RelayState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Events and Actions
// =============================================================================

/// Inputs to the state machine, already parsed and decoded by the driver
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// The carrier delivered the `start` event with call metadata
    Started(StartMetadata),
    /// One decoded frame of caller audio (inbound track only)
    InboundAudio(Bytes),
    /// The carrier delivered the `stop` event
    StopReceived,
    /// The telephony socket is closed (peer close, error, or our own close completed)
    TelephonyClosed,
    /// The upstream session is open, initialized, and ready for audio
    UpstreamReady,
    /// The upstream session could not be opened (credential or connect failure)
    UpstreamFailed(String),
    /// Agent audio from upstream, base64-encoded as received
    UpstreamAudio(String),
    /// The agent was interrupted by caller speech (barge-in)
    UpstreamInterruption,
    /// The upstream socket is closed
    UpstreamClosed,
    /// The silence deadline elapsed
    SilenceElapsed(SilenceWindow),
}

/// Side effects for the driver to execute, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Construct the upstream session and start opening it
    ConnectUpstream,
    /// Forward one concatenated chunk of caller audio upstream
    SendUpstreamAudio(Bytes),
    /// Send the silence prompt upstream
    NotifySilence(SilenceWindow),
    /// Send a command to the telephony socket
    SendTelephony(TelephonyCommand),
    /// Arm the silence detector (entering the streaming phase)
    ArmSilence,
    /// Reschedule the silence deadline because caller audio arrived
    ResetSilence,
    /// Disarm the silence detector
    CancelSilence,
    /// Close the telephony socket, optionally with an error reason
    CloseTelephony { reason: Option<String> },
    /// Close the upstream session (aborts an in-flight open)
    CloseUpstream,
}

// =============================================================================
// State Machine
// =============================================================================

/// State machine for one telephony call
pub struct RelaySession {
    session_id: String,
    state: RelayState,
    stream_sid: Option<String>,
    call_sid: Option<String>,
    prompt_override: Option<String>,
    greeting_override: Option<String>,
    /// Caller audio awaiting the next flush
    pending_audio: BytesMut,
    /// Bytes discarded from the front of the buffer since the last flush
    pending_dropped: usize,
    chunk_threshold: usize,
    max_pending_audio: usize,
    telephony_open: bool,
    /// True from the moment ConnectUpstream is issued until closure is confirmed
    upstream_active: bool,
}

impl RelaySession {
    /// Create a session in `AwaitingStart`
    ///
    /// # Arguments
    /// * `session_id` - Correlation id for log lines (one per socket)
    /// * `chunk_threshold` - Bytes of caller audio accumulated before a flush
    /// * `max_pending_audio` - Cap on audio buffered before the upstream opens
    pub fn new(session_id: String, chunk_threshold: usize, max_pending_audio: usize) -> Self {
        Self {
            session_id,
            state: RelayState::AwaitingStart,
            stream_sid: None,
            call_sid: None,
            prompt_override: None,
            greeting_override: None,
            pending_audio: BytesMut::new(),
            pending_dropped: 0,
            chunk_threshold,
            max_pending_audio,
            telephony_open: true,
            upstream_active: false,
        }
    }

    /// Feed one event through the machine, returning the actions to execute
    pub fn handle(&mut self, event: RelayEvent) -> Vec<RelayAction> {
        match event {
            RelayEvent::Started(meta) => self.on_started(meta),
            RelayEvent::InboundAudio(audio) => self.on_inbound_audio(audio),
            RelayEvent::StopReceived => {
                debug!(session_id = %self.session_id, "Telephony stop received");
                self.begin_closing()
            }
            RelayEvent::TelephonyClosed => self.on_telephony_closed(),
            RelayEvent::UpstreamReady => self.on_upstream_ready(),
            RelayEvent::UpstreamFailed(reason) => self.on_upstream_failed(reason),
            RelayEvent::UpstreamAudio(payload) => self.on_upstream_audio(payload),
            RelayEvent::UpstreamInterruption => self.on_upstream_interruption(),
            RelayEvent::UpstreamClosed => self.on_upstream_closed(),
            RelayEvent::SilenceElapsed(window) => self.on_silence_elapsed(window),
        }
    }

    fn on_started(&mut self, meta: StartMetadata) -> Vec<RelayAction> {
        if self.state != RelayState::AwaitingStart {
            warn!(
                session_id = %self.session_id,
                state = %self.state,
                "Ignoring duplicate start event"
            );
            return Vec::new();
        }

        if let Some(format) = &meta.media_format
            && !format.is_mulaw_8khz()
        {
            // Mismatched audio formats are a configuration error; the relay
            // does not transcode, it forwards frames as-is.
            warn!(
                session_id = %self.session_id,
                encoding = %format.encoding,
                sample_rate = format.sample_rate,
                "Unexpected media format, expected 8 kHz mu-law"
            );
        }

        info!(
            session_id = %self.session_id,
            stream_sid = %meta.stream_sid,
            call_sid = %meta.call_sid,
            "Media stream started"
        );

        self.stream_sid = Some(meta.stream_sid);
        self.call_sid = Some(meta.call_sid);
        self.prompt_override = meta.custom_parameters.get("prompt").cloned();
        self.greeting_override = meta.custom_parameters.get("greeting").cloned();
        self.state = RelayState::AwaitingFirstAudio;
        Vec::new()
    }

    fn on_inbound_audio(&mut self, audio: Bytes) -> Vec<RelayAction> {
        match self.state {
            RelayState::AwaitingStart => {
                warn!(session_id = %self.session_id, "Audio before start event, dropping");
                Vec::new()
            }
            RelayState::AwaitingFirstAudio => {
                // First real caller audio: now it is worth opening an agent
                // session. The triggering frame is buffered, not dropped.
                self.buffer_audio(&audio);
                self.state = RelayState::ConnectingUpstream;
                self.upstream_active = true;
                info!(session_id = %self.session_id, "First caller audio, connecting upstream");
                vec![RelayAction::ConnectUpstream]
            }
            RelayState::ConnectingUpstream => {
                self.buffer_audio(&audio);
                Vec::new()
            }
            RelayState::Streaming => {
                self.buffer_audio(&audio);
                let mut actions = Vec::new();
                if self.pending_audio.len() >= self.chunk_threshold {
                    actions.push(RelayAction::SendUpstreamAudio(self.drain_pending()));
                }
                actions.push(RelayAction::ResetSilence);
                actions
            }
            RelayState::Closing | RelayState::Closed | RelayState::Failed => {
                debug!(session_id = %self.session_id, "Dropping audio during teardown");
                Vec::new()
            }
        }
    }

    fn on_upstream_ready(&mut self) -> Vec<RelayAction> {
        if self.state != RelayState::ConnectingUpstream {
            debug!(
                session_id = %self.session_id,
                state = %self.state,
                "Ignoring upstream ready outside connect phase"
            );
            return Vec::new();
        }

        info!(session_id = %self.session_id, "Upstream session ready, streaming");
        self.state = RelayState::Streaming;

        let mut actions = Vec::new();
        if !self.pending_audio.is_empty() {
            // Everything accumulated while connecting goes out as one send
            actions.push(RelayAction::SendUpstreamAudio(self.drain_pending()));
        }
        actions.push(RelayAction::ArmSilence);
        actions
    }

    fn on_upstream_failed(&mut self, reason: String) -> Vec<RelayAction> {
        match self.state {
            RelayState::ConnectingUpstream => self.fail(reason),
            RelayState::Streaming => {
                warn!(
                    session_id = %self.session_id,
                    reason = %reason,
                    "Upstream error while streaming, closing call"
                );
                self.begin_closing()
            }
            _ => {
                debug!(
                    session_id = %self.session_id,
                    state = %self.state,
                    reason = %reason,
                    "Ignoring upstream failure during teardown"
                );
                Vec::new()
            }
        }
    }

    fn on_upstream_audio(&mut self, payload: String) -> Vec<RelayAction> {
        if self.state != RelayState::Streaming {
            debug!(session_id = %self.session_id, "Dropping agent audio outside streaming");
            return Vec::new();
        }

        match &self.stream_sid {
            Some(sid) => vec![RelayAction::SendTelephony(
                TelephonyCommand::media_from_encoded(sid, payload),
            )],
            None => {
                warn!(session_id = %self.session_id, "Agent audio without a stream id");
                Vec::new()
            }
        }
    }

    fn on_upstream_interruption(&mut self) -> Vec<RelayAction> {
        if self.state != RelayState::Streaming {
            return Vec::new();
        }

        match &self.stream_sid {
            Some(sid) => {
                info!(session_id = %self.session_id, "Barge-in, clearing queued playback");
                vec![RelayAction::SendTelephony(TelephonyCommand::clear(sid))]
            }
            None => Vec::new(),
        }
    }

    fn on_silence_elapsed(&mut self, window: SilenceWindow) -> Vec<RelayAction> {
        if self.state != RelayState::Streaming {
            debug!(session_id = %self.session_id, "Ignoring stale silence firing");
            return Vec::new();
        }

        info!(
            session_id = %self.session_id,
            first_turn = window.is_first_turn,
            threshold_ms = window.threshold.as_millis() as u64,
            "Caller silence elapsed, prompting agent"
        );
        vec![RelayAction::NotifySilence(window)]
    }

    fn on_telephony_closed(&mut self) -> Vec<RelayAction> {
        self.telephony_open = false;

        match self.state {
            RelayState::Closing => {
                self.maybe_finish();
                Vec::new()
            }
            RelayState::Closed | RelayState::Failed => Vec::new(),
            _ => {
                debug!(session_id = %self.session_id, "Telephony socket closed");
                self.begin_closing()
            }
        }
    }

    fn on_upstream_closed(&mut self) -> Vec<RelayAction> {
        self.upstream_active = false;

        match self.state {
            RelayState::Closing => {
                self.maybe_finish();
                Vec::new()
            }
            RelayState::Closed | RelayState::Failed => Vec::new(),
            RelayState::Streaming | RelayState::ConnectingUpstream => {
                info!(session_id = %self.session_id, "Upstream closed, ending call");
                self.begin_closing()
            }
            _ => Vec::new(),
        }
    }

    /// Enter `Closing`, emitting close actions for whichever sides are open.
    /// Re-entry while already closing (or terminal) is a no-op.
    fn begin_closing(&mut self) -> Vec<RelayAction> {
        if matches!(
            self.state,
            RelayState::Closing | RelayState::Closed | RelayState::Failed
        ) {
            return Vec::new();
        }

        self.state = RelayState::Closing;
        let mut actions = vec![RelayAction::CancelSilence];
        if self.upstream_active {
            actions.push(RelayAction::CloseUpstream);
        }
        if self.telephony_open {
            actions.push(RelayAction::CloseTelephony { reason: None });
        }
        self.maybe_finish();
        actions
    }

    /// Enter `Failed`, closing both sides with an error indication
    fn fail(&mut self, reason: String) -> Vec<RelayAction> {
        if matches!(
            self.state,
            RelayState::Closing | RelayState::Closed | RelayState::Failed
        ) {
            return Vec::new();
        }

        warn!(
            session_id = %self.session_id,
            reason = %reason,
            "Relay session failed"
        );
        self.state = RelayState::Failed;

        let mut actions = vec![RelayAction::CancelSilence];
        if self.upstream_active {
            actions.push(RelayAction::CloseUpstream);
        }
        if self.telephony_open {
            actions.push(RelayAction::CloseTelephony {
                reason: Some(reason),
            });
        }
        actions
    }

    fn maybe_finish(&mut self) {
        if self.state == RelayState::Closing && !self.telephony_open && !self.upstream_active {
            info!(session_id = %self.session_id, "Relay session closed");
            self.state = RelayState::Closed;
        }
    }

    /// Append caller audio, trimming the oldest bytes past the pending cap
    fn buffer_audio(&mut self, audio: &[u8]) {
        self.pending_audio.extend_from_slice(audio);
        if self.pending_audio.len() > self.max_pending_audio {
            let overflow = self.pending_audio.len() - self.max_pending_audio;
            self.pending_audio.advance(overflow);
            self.pending_dropped += overflow;
        }
    }

    /// Take the whole pending buffer as one immutable chunk
    fn drain_pending(&mut self) -> Bytes {
        if self.pending_dropped > 0 {
            warn!(
                session_id = %self.session_id,
                dropped_bytes = self.pending_dropped,
                "Caller audio was trimmed while the upstream was unavailable"
            );
            self.pending_dropped = 0;
        }
        self.pending_audio.split().freeze()
    }

    /// Current lifecycle phase
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Stream id from the start event, if received
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Call id from the start event, if received
    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    /// Caller-supplied prompt override from the start event
    pub fn prompt_override(&self) -> Option<&str> {
        self.prompt_override.as_deref()
    }

    /// Caller-supplied greeting override from the start event
    pub fn greeting_override(&self) -> Option<&str> {
        self.greeting_override.as_deref()
    }

    /// Session correlation id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
