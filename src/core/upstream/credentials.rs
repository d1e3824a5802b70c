//! Short-lived session credential fetch.
//!
//! Before opening the agent WebSocket the gateway exchanges its long-lived
//! API key for a signed, single-use socket URL over HTTPS. The exchange is
//! retried with exponential backoff because it sits on the critical path of
//! call setup: a transient 5xx here would otherwise drop the call.

use std::time::Duration;

use serde::Deserialize;

use super::base::{RetryPolicy, UpstreamError, UpstreamResult};

// =============================================================================
// Types
// =============================================================================

/// A signed socket URL good for one session.
#[derive(Debug, Clone)]
pub struct UpstreamCredential {
    /// WebSocket URL to connect to, authorization embedded
    pub socket_url: String,
}

/// Parameters for a credential exchange.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    /// Full HTTPS endpoint issuing the signed URL
    pub endpoint: String,
    /// Header name carrying the API key
    pub api_key_header: &'static str,
    /// API key value
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

// =============================================================================
// Fetch
// =============================================================================

/// Perform a single credential exchange.
async fn fetch_once(
    http: &reqwest::Client,
    request: &CredentialRequest,
) -> UpstreamResult<UpstreamCredential> {
    let response = http
        .get(&request.endpoint)
        .header(request.api_key_header, &request.api_key)
        .timeout(request.timeout)
        .send()
        .await
        .map_err(|e| UpstreamError::CredentialFetch(format!("Request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::CredentialFetch(format!(
            "Credential endpoint returned {status}: {body}"
        )));
    }

    let parsed: SignedUrlResponse = response
        .json()
        .await
        .map_err(|e| UpstreamError::CredentialFetch(format!("Malformed response: {e}")))?;

    if parsed.signed_url.is_empty() {
        return Err(UpstreamError::CredentialFetch(
            "Credential endpoint returned an empty signed_url".to_string(),
        ));
    }

    Ok(UpstreamCredential {
        socket_url: parsed.signed_url,
    })
}

/// Fetch a session credential, retrying transient failures.
///
/// Makes up to `retry.max_attempts` attempts. After a failed attempt the
/// task sleeps for the policy's delay before trying again; no sleep follows
/// the final attempt. Returns the last error when every attempt fails.
pub async fn fetch_credential(
    http: &reqwest::Client,
    request: &CredentialRequest,
    retry: &RetryPolicy,
) -> UpstreamResult<UpstreamCredential> {
    let mut attempt = 1;
    loop {
        match fetch_once(http, request).await {
            Ok(credential) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Credential fetch succeeded after retry");
                }
                return Ok(credential);
            }
            Err(e) if retry.should_retry(attempt) => {
                let delay_ms = retry.calculate_delay(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms,
                    error = %e,
                    "Credential fetch failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "Credential fetch exhausted retries");
                return Err(e);
            }
        }
    }
}
