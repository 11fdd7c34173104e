//! Terminal payment traits and shared types.
//!
//! Defines the `PaymentTerminal` trait that provider integrations implement,
//! the `TerminalBackend` RPC surface they talk to, and the `Operator` seam
//! through which the cashier is asked and told things.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::line::PaymentLine;
use crate::error::{BackendError, TerminalError};

// ---------------------------------------------------------------------------
// Provider status
// ---------------------------------------------------------------------------

/// Payment status as reported by Mollie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderStatus {
    Open,
    Pending,
    Authorized,
    Paid,
    Failed,
    Expired,
    Canceled,
    Other(String),
}

impl ProviderStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "pending" => Self::Pending,
            "authorized" => Self::Authorized,
            "paid" => Self::Paid,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            "canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
            Self::Other(s) => s,
        }
    }

    /// Paid, or one of the outcomes that end the attempt unpaid.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Failed | Self::Expired | Self::Canceled
        )
    }
}

impl From<String> for ProviderStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ProviderStatus> for String {
    fn from(s: ProviderStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Backend request / response
// ---------------------------------------------------------------------------

/// Payment request data sent to the backend for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub mollie_uid: String,
    /// Order name, used as the payment description.
    pub description: String,
    pub order_id: String,
    pub currency: String,
    /// Amount in cents.
    pub amount: i64,
    pub session_key: String,
}

impl PaymentRequest {
    pub fn for_line(line: &PaymentLine, mollie_uid: &str, session_key: &str) -> Self {
        Self {
            mollie_uid: mollie_uid.to_string(),
            description: line.order_name(),
            order_id: line.order_ref(),
            currency: line.currency(),
            amount: line.amount(),
            session_key: session_key.to_string(),
        }
    }
}

/// Backend answer to a payment request or a status check.
///
/// Mollie answers with a payment object on success and with an error
/// object (`detail`, no `status`) otherwise, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub status: Option<ProviderStatus>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ProviderResponse {
    /// Lenient conversion from a raw Mollie JSON body.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        Self {
            status: text("status").map(|s| ProviderStatus::parse(&s)),
            id: text("id"),
            detail: text("detail").or_else(|| text("error")),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == Some(ProviderStatus::Open)
    }
}

/// Successful submission of a payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub mollie_uid: String,
    pub transaction_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Poll settings
// ---------------------------------------------------------------------------

/// Timing of the confirmation wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between two status checks on the poll path.
    pub interval: Duration,
    /// Consecutive failed status checks that are retried before giving up.
    pub retries: u32,
    /// Timeout of a single status check.
    pub request_timeout: Duration,
    /// Ceiling on the whole wait, whatever the channels report.
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5500),
            retries: 4,
            request_timeout: Duration::from_millis(5000),
            max_wait: Duration::from_secs(600),
        }
    }
}

// ---------------------------------------------------------------------------
// Operator prompts
// ---------------------------------------------------------------------------

/// A yes/no question put to the cashier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub title: String,
    pub body: String,
    pub confirm_text: String,
    pub cancel_text: String,
}

impl ConfirmPrompt {
    pub fn force_cancel() -> Self {
        Self {
            title: "Cancel mollie payment".into(),
            body: "First cancel transaction on POS device. Only use force cancel if that fails"
                .into(),
            confirm_text: "Force Cancel".into(),
            cancel_text: "Discard".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// RPC surface of the host backend.
#[async_trait]
pub trait TerminalBackend: Send + Sync {
    /// Forward a payment request to the provider for the given POS payment
    /// method.
    async fn submit_payment_request(
        &self,
        method_id: i64,
        request: &PaymentRequest,
    ) -> Result<ProviderResponse, BackendError>;

    /// Latest known provider status for a correlation id, `None` when the
    /// backend has no record of it.
    async fn get_payment_status(
        &self,
        mollie_uid: &str,
    ) -> Result<Option<ProviderResponse>, BackendError>;
}

/// The cashier in front of the POS.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Ask a question and wait for the answer.
    async fn confirm(&self, prompt: &ConfirmPrompt) -> bool;

    /// Show an error without waiting for acknowledgement.
    fn show_error(&self, title: &str, message: &str);
}

/// Payment terminal integration. One implementation per provider.
#[async_trait]
pub trait PaymentTerminal: Send + Sync {
    /// Provider name (for logging/display).
    fn name(&self) -> &str;

    /// Send the payment request for `line` to the provider.
    async fn submit_payment(&self, line: &PaymentLine) -> Result<Accepted, TerminalError>;

    /// Wait until the payment on `line` is confirmed (`true`) or ends unpaid
    /// (`false`).
    async fn await_confirmation(&self, line: &PaymentLine) -> Result<bool, TerminalError>;

    /// Force-cancel the payment on `line` after asking the operator.
    /// Returns `true` only when the line was moved to retry by this call.
    async fn cancel_payment(&self, line: &PaymentLine) -> bool;

    /// Submit, then wait for confirmation.
    async fn send_payment_request(&self, line: &PaymentLine) -> Result<bool, TerminalError> {
        self.submit_payment(line).await?;
        self.await_confirmation(line).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_status_roundtrips_unknown_values() {
        let status: ProviderStatus = serde_json::from_value(json!("settling")).unwrap();
        assert_eq!(status, ProviderStatus::Other("settling".into()));
        assert_eq!(serde_json::to_value(&status).unwrap(), json!("settling"));
        assert!(!status.is_final());
        assert!(ProviderStatus::Expired.is_final());
    }

    #[test]
    fn test_provider_response_from_payment_object() {
        let resp = ProviderResponse::from_value(&json!({
            "resource": "payment",
            "id": "tr_WDqYK6vllg",
            "status": "open",
            "amount": {"currency": "EUR", "value": "10.00"},
        }));
        assert!(resp.is_open());
        assert_eq!(resp.id.as_deref(), Some("tr_WDqYK6vllg"));
        assert_eq!(resp.detail, None);
    }

    #[test]
    fn test_provider_response_from_error_object() {
        let resp = ProviderResponse::from_value(&json!({
            "status": 422,
            "title": "Unprocessable Entity",
            "detail": "The terminal is not active",
        }));
        // A numeric HTTP status is not a payment status.
        assert_eq!(resp.status, None);
        assert_eq!(resp.detail.as_deref(), Some("The terminal is not active"));

        let resp = ProviderResponse::from_value(&json!({"error": "Something went wrong"}));
        assert_eq!(resp.detail.as_deref(), Some("Something went wrong"));
    }

    #[test]
    fn test_payment_request_for_line() {
        let line = PaymentLine::new("ord-7", "Shop/0007", 1999, "EUR");
        let req = PaymentRequest::for_line(&line, "uid-7", "config-1");
        assert_eq!(req.description, "Shop/0007");
        assert_eq!(req.order_id, "ord-7");
        assert_eq!(req.amount, 1999);
        assert_eq!(req.session_key, "config-1");
    }

    #[test]
    fn test_default_poll_settings() {
        let s = PollSettings::default();
        assert_eq!(s.interval, Duration::from_millis(5500));
        assert_eq!(s.retries, 4);
    }
}
