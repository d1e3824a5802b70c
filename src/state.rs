//! Shared application state
//!
//! One `AppState` is created at startup and shared across every handler and
//! middleware via `Arc`. It owns the immutable server configuration, the shared
//! HTTP client (reused for carrier REST calls and credential fetches), and the
//! media-stream connection accounting used by the connection limit middleware
//! and the health endpoint.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::core::telephony::client::CarrierClient;

/// Connect-phase deadline for outbound HTTP requests
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a connection was refused by [`AppState::try_acquire_connection`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The global media-stream connection cap has been reached
    #[error("Global connection limit reached")]
    GlobalLimitReached,

    /// This client IP already holds the maximum number of connections
    #[error("Per-IP connection limit reached")]
    PerIpLimitReached,
}

/// Shared application state
pub struct AppState {
    /// Server configuration loaded at startup
    pub config: ServerConfig,
    /// Shared HTTP client with connection pooling
    pub http_client: reqwest::Client,
    /// Carrier REST API client for placing outbound calls
    pub carrier: CarrierClient,
    /// Number of currently open media-stream WebSocket connections
    ws_connections: AtomicUsize,
    /// Open connections per client IP
    ip_connections: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Create the shared application state
    ///
    /// # Arguments
    /// * `config` - Validated server configuration
    ///
    /// # Returns
    /// * `Arc<AppState>` - Shared state handle for routers and middleware
    ///
    /// # Panics
    /// Panics if the TLS backend cannot be initialized, the same condition
    /// under which `reqwest::Client::new` panics.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_request_timeout_secs))
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        let carrier = CarrierClient::new(&config, http_client.clone());

        Arc::new(Self {
            config,
            http_client,
            carrier,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Try to reserve a media-stream connection slot for the given IP
    ///
    /// Checks the global cap first, then the per-IP cap. On success both
    /// counters are incremented and the caller must eventually call
    /// [`AppState::release_connection`] with the same IP.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_media_connections
            && self.ws_connections.load(Ordering::Acquire) >= max
        {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        let mut entry = self.ip_connections.entry(ip).or_insert(0);
        if *entry >= self.config.max_connections_per_ip as usize {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *entry += 1;
        drop(entry);

        self.ws_connections.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Release a previously acquired connection slot
    ///
    /// Safe to call at most once per successful acquire. Decrements saturate at
    /// zero so an unbalanced release cannot underflow the counters.
    pub fn release_connection(&self, ip: IpAddr) {
        if let Some(mut entry) = self.ip_connections.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
            let now_empty = *entry == 0;
            drop(entry);
            if now_empty {
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            }
        }

        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
    }

    /// Number of currently open media-stream connections
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    /// Number of currently open connections from a specific IP
    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}
