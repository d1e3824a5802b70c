//! Carrier REST client for outbound call placement.
//!
//! One thin wrapper around the carrier's call-control API. The client is
//! constructed once in `AppState` from the loaded configuration and injected
//! where needed; nothing in this module reads globals.

use serde::Deserialize;

use crate::config::ServerConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from the carrier's call-control API.
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    /// Transport-level failure reaching the carrier
    #[error("Carrier request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The carrier rejected the request
    #[error("Carrier API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The carrier accepted the request but the response was unusable
    #[error("Malformed carrier response: {0}")]
    MalformedResponse(String),
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// Parameters for placing one outbound call.
#[derive(Debug, Clone)]
pub struct OutboundCallRequest {
    /// Destination number, E.164
    pub to: String,
    /// URL the carrier fetches for call instructions once the call connects
    pub instruction_url: String,
    /// URL receiving call-status webhooks
    pub status_callback: Option<String>,
    /// URL receiving the async answering-machine-detection result
    pub amd_callback: Option<String>,
}

/// A successfully placed call.
#[derive(Debug, Clone, Deserialize)]
pub struct PlacedCall {
    /// Carrier call identifier
    pub sid: String,
    /// Initial call status, typically "queued"
    pub status: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// REST client for the carrier's call-control API.
pub struct CarrierClient {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl CarrierClient {
    pub fn new(config: &ServerConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            api_base: config.twilio_api_base.trim_end_matches('/').to_string(),
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from_number: config.twilio_from_number.clone(),
        }
    }

    /// Place an outbound call.
    ///
    /// The carrier dials `to` and, once the call connects, fetches
    /// `instruction_url` for the media-stream instructions.
    /// Answering-machine detection runs asynchronously so it does not delay
    /// call setup; its result arrives on `amd_callback`.
    ///
    /// # Returns
    ///
    /// The carrier call identifier and initial status.
    pub async fn place_call(
        &self,
        request: &OutboundCallRequest,
    ) -> Result<PlacedCall, CarrierError> {
        let endpoint = self.calls_endpoint();

        let mut form: Vec<(&str, String)> = vec![
            ("To", request.to.clone()),
            ("From", self.from_number.clone()),
            ("Url", request.instruction_url.clone()),
        ];
        if let Some(ref status_callback) = request.status_callback {
            form.push(("StatusCallback", status_callback.clone()));
            form.push(("StatusCallbackMethod", "POST".to_string()));
        }
        if let Some(ref amd_callback) = request.amd_callback {
            form.push(("MachineDetection", "Enable".to_string()));
            form.push(("AsyncAmd", "true".to_string()));
            form.push(("AsyncAmdStatusCallback", amd_callback.clone()));
            form.push(("AsyncAmdStatusCallbackMethod", "POST".to_string()));
        }

        let response = self
            .http
            .post(&endpoint)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Carrier rejected call placement");
            return Err(CarrierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let placed: PlacedCall = response
            .json()
            .await
            .map_err(|e| CarrierError::MalformedResponse(e.to_string()))?;

        tracing::info!(call_sid = %placed.sid, to = %request.to, "Outbound call placed");
        Ok(placed)
    }

    /// Caller id used as the From number on outbound calls.
    pub fn from_number(&self) -> &str {
        &self.from_number
    }

    fn calls_endpoint(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.account_sid
        )
    }
}
