//! Error types shared across the crate.
//!
//! The SQLite helpers keep returning `Result<_, String>`; everything that
//! crosses a module boundary with a caller that needs to branch on the
//! failure kind uses one of the enums below.

use serde_json::Value;
use thiserror::Error;

use crate::terminal::line::LineStatus;

/// Failure of a terminal payment attempt.
///
/// `Connectivity`, `Exhausted` and `TimedOut` are retryable by the operator;
/// `ProviderRejected` carries Mollie's own message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    #[error("could not reach the payment backend: {0}")]
    Connectivity(String),
    #[error("payment rejected by Mollie: {0}")]
    ProviderRejected(String),
    #[error("payment status unavailable after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("no confirmation received before the wait limit")]
    TimedOut,
    #[error("cannot process transactions with negative or zero amount")]
    InvalidAmount,
    #[error("payment line has not been submitted")]
    NotSubmitted,
    #[error("payment line is not waiting for a card (status: {0})")]
    NotWaiting(LineStatus),
    #[error("a payment attempt is already in progress (status: {0})")]
    AttemptInProgress(LineStatus),
    #[error("payment line is already paid")]
    AlreadyPaid,
    #[error("payment line has no interrupted attempt to resume")]
    NotResumable,
    #[error("a confirmation is already pending for {0}")]
    AlreadyAwaiting(String),
    #[error("no terminal registered for payment method {0}")]
    UnknownPaymentMethod(i64),
    #[error("unsupported payment terminal provider: '{0}'")]
    UnsupportedProvider(String),
}

impl TerminalError {
    /// Whether the operator can simply try the same payment again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::Exhausted { .. } | Self::TimedOut
        )
    }
}

/// Failure reaching or running the backend RPC surface.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Failure of a strict Mollie API call.
#[derive(Debug, Error)]
pub enum MollieError {
    #[error("Mollie returned HTTP {status}: {details}")]
    Http { status: u16, details: Value },
    #[error("{0}")]
    Transport(String),
    #[error("unexpected Mollie response: {0}")]
    Decode(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// The QR redirect poll stopped without a landing route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusPollError {
    #[error("transaction still pending after {polls} polls")]
    GaveUp { polls: u32 },
    #[error("status poll cancelled")]
    Cancelled,
}
