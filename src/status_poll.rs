//! QR redirect status poll.
//!
//! While the customer scans a payment QR code, the checkout polls the
//! web shop's `/payment/status/poll` route. Once the first transaction
//! leaves `draft`, the customer is sent to its landing route.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StatusPollError;

/// Default delay between two polls.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransactionDisplay {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub landing_route: Option<String>,
}

/// `result` of the status poll RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub display_values_list: Vec<TransactionDisplay>,
}

impl PollResponse {
    /// Landing route of the first transaction once it is no longer draft.
    pub fn landing_route(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        let first = self.display_values_list.first()?;
        if first.state == "draft" {
            return None;
        }
        first.landing_route.as_deref()
    }
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn poll(&self) -> Result<PollResponse, String>;
}

/// Poll until a landing route is available.
pub async fn wait_for_landing_route(
    source: &dyn StatusSource,
    interval: Duration,
    max_polls: Option<u32>,
) -> Result<String, StatusPollError> {
    wait_for_landing_route_until(source, interval, max_polls, &CancellationToken::new()).await
}

/// Same as [`wait_for_landing_route`], stopping early when `cancel` fires
/// (the QR dialog was closed).
pub async fn wait_for_landing_route_until(
    source: &dyn StatusSource,
    interval: Duration,
    max_polls: Option<u32>,
    cancel: &CancellationToken,
) -> Result<String, StatusPollError> {
    let mut polls = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(StatusPollError::Cancelled);
        }

        polls += 1;
        match source.poll().await {
            Ok(resp) => {
                if let Some(route) = resp.landing_route() {
                    info!(polls, route = %route, "transaction left draft, redirecting");
                    return Ok(route.to_string());
                }
                debug!(polls, "transaction still draft");
            }
            Err(e) => warn!(polls, error = %e, "payment status poll failed"),
        }

        if max_polls.is_some_and(|max| polls >= max) {
            return Err(StatusPollError::GaveUp { polls });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(StatusPollError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

/// Polls `{base}/payment/status/poll` over JSON-RPC.
pub struct HttpStatusSource {
    http: Client,
    url: String,
    session_id: Option<String>,
    next_id: AtomicU64,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            http,
            url: format!("{}/payment/status/poll", base_url.trim().trim_end_matches('/')),
            session_id: None,
            next_id: AtomicU64::new(1),
        })
    }

    /// Send the shopper's web session cookie with every poll.
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn poll(&self) -> Result<PollResponse, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {},
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        let mut req = self.http.post(&self.url).json(&body);
        if let Some(session) = &self.session_id {
            req = req.header(COOKIE, format!("session_id={session}"));
        }

        let resp = req.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("status poll returned HTTP {}", resp.status().as_u16()));
        }
        let value: Value = resp.json().await.map_err(|e| e.to_string())?;
        if let Some(err) = value.get("error") {
            let message = err
                .pointer("/data/message")
                .or_else(|| err.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("status poll failed");
            return Err(message.to_string());
        }
        serde_json::from_value(value.get("result").cloned().unwrap_or(Value::Null))
            .map_err(|e| format!("unexpected status poll result: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
