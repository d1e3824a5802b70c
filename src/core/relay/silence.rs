//! Silence detection for conversational turn-taking
//!
//! The detector tracks a single deadline: the moment at which the caller has
//! been quiet long enough that the agent should be prompted to speak. It is
//! deliberately passive — it never spawns timers. The session's event loop
//! reads [`SilenceDetector::deadline`], sleeps until it, and calls
//! [`SilenceDetector::fire`] when the sleep completes, so every firing happens
//! on the session's own serialized context.
//!
//! Two thresholds apply: a shorter "initial" threshold before the agent's
//! first prompted turn (so a quiet callee is engaged quickly after pickup) and
//! a longer "conversation" threshold afterwards. The switch is permanent after
//! the first firing.

use tokio::time::{Duration, Instant};

/// Description of one elapsed silence period, handed to the upstream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceWindow {
    /// The threshold that elapsed
    pub threshold: Duration,
    /// True when this is the first silence of the call
    pub is_first_turn: bool,
}

/// Deadline-based silence detector for one relay session
#[derive(Debug)]
pub struct SilenceDetector {
    initial: Duration,
    conversation: Duration,
    deadline: Option<Instant>,
    active: bool,
    first_turn: bool,
}

impl SilenceDetector {
    /// Create a detector with the two configured thresholds
    pub fn new(initial: Duration, conversation: Duration) -> Self {
        Self {
            initial,
            conversation,
            deadline: None,
            active: false,
            first_turn: true,
        }
    }

    /// The threshold in effect for the next firing
    fn current_threshold(&self) -> Duration {
        if self.first_turn {
            self.initial
        } else {
            self.conversation
        }
    }

    /// Arm the detector, scheduling a firing after the current threshold
    ///
    /// Called when the session enters the streaming phase. Re-arming while
    /// already armed simply reschedules.
    pub fn arm(&mut self, now: Instant) {
        self.active = true;
        self.deadline = Some(now + self.current_threshold());
    }

    /// Push the deadline out because caller audio just arrived
    ///
    /// No-op unless armed. Also re-arms the deadline after a firing, so the
    /// next silence is measured from the most recent audio.
    pub fn on_audio_received(&mut self, now: Instant) {
        if self.active {
            self.deadline = Some(now + self.current_threshold());
        }
    }

    /// Consume an elapsed deadline, producing the window that fired
    ///
    /// Returns `None` when the detector is not armed or has no pending
    /// deadline (already fired, not yet rescheduled). After a firing the
    /// first-turn flag flips permanently and no further firing can happen
    /// until new audio re-arms the deadline.
    pub fn fire(&mut self) -> Option<SilenceWindow> {
        if !self.active {
            return None;
        }
        self.deadline.take()?;

        let window = SilenceWindow {
            threshold: self.current_threshold(),
            is_first_turn: self.first_turn,
        };
        self.first_turn = false;
        Some(window)
    }

    /// Disarm the detector entirely (session teardown)
    pub fn cancel(&mut self) {
        self.active = false;
        self.deadline = None;
    }

    /// The instant at which the detector wants to fire, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the next firing would be the first of the call
    pub fn is_first_turn(&self) -> bool {
        self.first_turn
    }
}
