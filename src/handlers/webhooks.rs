//! Call lifecycle webhook endpoints
//!
//! The carrier posts call-progress and answering-machine-detection results
//! here as form bodies. These handlers are purely observational: they type
//! and log what arrived, own no state, and always acknowledge with an empty
//! `200 OK` so the carrier never retries. Values that fail to parse are
//! logged as raw strings rather than rejected.

use std::fmt;

use axum::Form;
use axum::http::StatusCode;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use tracing::{info, warn};

// =============================================================================
// Typed carrier vocabularies
// =============================================================================

/// Call progress states reported on the status webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Canceled,
    Failed,
}

impl CallStatus {
    /// Parse a carrier status string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(CallStatus::Queued),
            "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" | "in_progress" | "answered" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "busy" => Some(CallStatus::Busy),
            "no-answer" | "no_answer" => Some(CallStatus::NoAnswer),
            "canceled" | "cancelled" => Some(CallStatus::Canceled),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    /// Whether the call has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Canceled
                | CallStatus::Failed
        )
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Queued => "queued",
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Canceled => "canceled",
            CallStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Answering-machine-detection classifications reported on the AMD webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsweredBy {
    Human,
    MachineStart,
    MachineEndBeep,
    MachineEndSilence,
    MachineEndOther,
    Fax,
    Unknown,
}

impl AnsweredBy {
    /// Parse a carrier AMD classification string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(AnsweredBy::Human),
            "machine_start" => Some(AnsweredBy::MachineStart),
            "machine_end_beep" => Some(AnsweredBy::MachineEndBeep),
            "machine_end_silence" => Some(AnsweredBy::MachineEndSilence),
            "machine_end_other" => Some(AnsweredBy::MachineEndOther),
            "fax" => Some(AnsweredBy::Fax),
            "unknown" => Some(AnsweredBy::Unknown),
            _ => None,
        }
    }

    /// Whether a machine (or fax) answered rather than a person
    pub fn is_machine(&self) -> bool {
        !matches!(self, AnsweredBy::Human | AnsweredBy::Unknown)
    }
}

impl fmt::Display for AnsweredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnsweredBy::Human => "human",
            AnsweredBy::MachineStart => "machine_start",
            AnsweredBy::MachineEndBeep => "machine_end_beep",
            AnsweredBy::MachineEndSilence => "machine_end_silence",
            AnsweredBy::MachineEndOther => "machine_end_other",
            AnsweredBy::Fax => "fax",
            AnsweredBy::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Webhook payloads
// =============================================================================

/// Form body of the status webhook
///
/// Every field is optional so partial or future-shaped posts still reach the
/// log instead of bouncing off the extractor.
#[derive(Debug, Deserialize)]
pub struct CallStatusPayload {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
    #[serde(rename = "CallDuration")]
    pub call_duration: Option<String>,
    #[serde(rename = "Direction")]
    pub direction: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "Timestamp")]
    pub timestamp: Option<String>,
}

/// Form body of the AMD webhook
#[derive(Debug, Deserialize)]
pub struct AmdPayload {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "AnsweredBy")]
    pub answered_by: Option<String>,
    #[serde(rename = "MachineDetectionDuration")]
    pub machine_detection_duration: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Log a call-status webhook delivery
///
/// # Returns
/// * `200 OK` with an empty body, unconditionally
pub async fn call_status_webhook(Form(payload): Form<CallStatusPayload>) -> StatusCode {
    let call_sid = payload.call_sid.as_deref().unwrap_or("unknown");

    let status = payload.call_status.as_deref().and_then(CallStatus::parse);
    let timestamp = payload
        .timestamp
        .as_deref()
        .and_then(|raw| OffsetDateTime::parse(raw, &Rfc2822).ok());

    match status {
        Some(status) => {
            info!(
                call_sid = %call_sid,
                status = %status,
                terminal = status.is_terminal(),
                duration_s = payload.call_duration.as_deref(),
                direction = payload.direction.as_deref(),
                from = payload.from.as_deref(),
                to = payload.to.as_deref(),
                timestamp = ?timestamp,
                "Call status update"
            );
        }
        None => {
            warn!(
                call_sid = %call_sid,
                raw_status = payload.call_status.as_deref(),
                "Call status update with unrecognized status"
            );
        }
    }

    StatusCode::OK
}

/// Log an answering-machine-detection webhook delivery
///
/// # Returns
/// * `200 OK` with an empty body, unconditionally
pub async fn amd_webhook(Form(payload): Form<AmdPayload>) -> StatusCode {
    let call_sid = payload.call_sid.as_deref().unwrap_or("unknown");

    match payload.answered_by.as_deref().and_then(AnsweredBy::parse) {
        Some(answered_by) => {
            info!(
                call_sid = %call_sid,
                answered_by = %answered_by,
                machine = answered_by.is_machine(),
                detection_ms = payload.machine_detection_duration.as_deref(),
                "Machine detection result"
            );
        }
        None => {
            warn!(
                call_sid = %call_sid,
                raw_answered_by = payload.answered_by.as_deref(),
                "Machine detection result with unrecognized classification"
            );
        }
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_status_parse() {
        assert_eq!(CallStatus::parse("completed"), Some(CallStatus::Completed));
        assert_eq!(CallStatus::parse("COMPLETED"), Some(CallStatus::Completed));
        assert_eq!(
            CallStatus::parse("in-progress"),
            Some(CallStatus::InProgress)
        );
        assert_eq!(CallStatus::parse("no_answer"), Some(CallStatus::NoAnswer));
        assert_eq!(CallStatus::parse("cancelled"), Some(CallStatus::Canceled));
        assert_eq!(CallStatus::parse("teleporting"), None);
    }

    #[test]
    fn test_call_status_display_round_trip() {
        for status in [
            CallStatus::Queued,
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::Busy,
            CallStatus::NoAnswer,
            CallStatus::Canceled,
            CallStatus::Failed,
        ] {
            assert_eq!(CallStatus::parse(&status.to_string()), Some(status));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_answered_by_parse() {
        assert_eq!(AnsweredBy::parse("human"), Some(AnsweredBy::Human));
        assert_eq!(
            AnsweredBy::parse("machine_end_beep"),
            Some(AnsweredBy::MachineEndBeep)
        );
        assert_eq!(AnsweredBy::parse("robot"), None);
    }

    #[test]
    fn test_machine_classification() {
        assert!(AnsweredBy::MachineStart.is_machine());
        assert!(AnsweredBy::Fax.is_machine());
        assert!(!AnsweredBy::Human.is_machine());
        assert!(!AnsweredBy::Unknown.is_machine());
    }

    #[tokio::test]
    async fn test_call_status_webhook_accepts_unknown_status() {
        let payload = CallStatusPayload {
            call_sid: Some("CA123".to_string()),
            call_status: Some("something-new".to_string()),
            call_duration: None,
            direction: None,
            from: None,
            to: None,
            timestamp: None,
        };
        let status = call_status_webhook(Form(payload)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_amd_webhook_accepts_empty_payload() {
        let payload = AmdPayload {
            call_sid: None,
            answered_by: None,
            machine_detection_duration: None,
        };
        let status = amd_webhook(Form(payload)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_rfc2822_timestamp_parses() {
        let parsed = OffsetDateTime::parse("Tue, 31 Aug 2010 20:36:28 +0000", &Rfc2822);
        assert!(parsed.is_ok());
    }
}
