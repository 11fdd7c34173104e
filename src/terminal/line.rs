//! Payment lines and their status machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status of a terminal payment line as seen by the cashier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineStatus {
    PendingSend,
    WaitingCard,
    Done,
    Retry,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSend => "pendingSend",
            Self::WaitingCard => "waitingCard",
            Self::Done => "done",
            Self::Retry => "retry",
        }
    }

    /// Apply `event`, returning the next status or `None` when the event is
    /// not valid from the current status.
    pub fn apply(self, event: LineEvent) -> Option<LineStatus> {
        use LineEvent::*;
        use LineStatus::*;
        match (self, event) {
            (Done, _) => None,
            (PendingSend | Retry, Submit) => Some(PendingSend),
            (PendingSend, Accepted) => Some(WaitingCard),
            (PendingSend, Rejected) => Some(Retry),
            (WaitingCard, Paid) => Some(Done),
            (WaitingCard, NotPaid) => Some(Retry),
            (WaitingCard, ForceCancelled) => Some(Retry),
            (WaitingCard, TimedOut) => Some(Retry),
            (Retry, Resume) => Some(WaitingCard),
            (PendingSend | WaitingCard, Exhausted) => Some(Retry),
            _ => None,
        }
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things that happen to a payment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Submit,
    Accepted,
    Rejected,
    Paid,
    NotPaid,
    ForceCancelled,
    Exhausted,
    TimedOut,
    Resume,
}

// ---------------------------------------------------------------------------
// Payment line
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LineState {
    cid: String,
    order_ref: String,
    order_name: String,
    /// Amount in cents.
    amount: i64,
    currency: String,
    uid: Option<String>,
    transaction_id: Option<String>,
    status: LineStatus,
    resumable: bool,
}

/// One terminal payment attempt on an order.
///
/// Cloning yields another handle to the same line, so the task waiting for
/// confirmation and the cashier's cancel action observe the same state.
#[derive(Debug, Clone)]
pub struct PaymentLine {
    inner: Arc<Mutex<LineState>>,
}

/// Point-in-time copy of a line, for logging and serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSnapshot {
    pub cid: String,
    pub order_ref: String,
    pub amount: i64,
    pub currency: String,
    pub mollie_uid: Option<String>,
    pub transaction_id: Option<String>,
    pub status: LineStatus,
}

impl PaymentLine {
    pub fn new(order_ref: &str, order_name: &str, amount: i64, currency: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LineState {
                cid: Uuid::new_v4().to_string(),
                order_ref: order_ref.to_string(),
                order_name: order_name.to_string(),
                amount,
                currency: currency.to_string(),
                uid: None,
                transaction_id: None,
                status: LineStatus::PendingSend,
                resumable: false,
            })),
        }
    }

    // The state has no invariants a panicking holder could break halfway,
    // so a poisoned lock is still safe to read.
    fn state(&self) -> MutexGuard<'_, LineState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cid(&self) -> String {
        self.state().cid.clone()
    }

    pub fn order_ref(&self) -> String {
        self.state().order_ref.clone()
    }

    pub fn order_name(&self) -> String {
        self.state().order_name.clone()
    }

    pub fn amount(&self) -> i64 {
        self.state().amount
    }

    pub fn currency(&self) -> String {
        self.state().currency.clone()
    }

    /// Correlation id of the current attempt.
    pub fn uid(&self) -> Option<String> {
        self.state().uid.clone()
    }

    pub fn transaction_id(&self) -> Option<String> {
        self.state().transaction_id.clone()
    }

    pub fn set_transaction_id(&self, id: &str) {
        self.state().transaction_id = Some(id.to_string());
    }

    pub fn status(&self) -> LineStatus {
        self.state().status
    }

    pub fn is_done(&self) -> bool {
        self.status() == LineStatus::Done
    }

    /// Whether the last attempt stopped because the status could not be
    /// fetched, leaving the device possibly still charging the card.
    pub fn is_resumable(&self) -> bool {
        let state = self.state();
        state.resumable && state.status == LineStatus::Retry
    }

    /// Apply `event`. Returns the new status, or `None` if the event was
    /// ignored for the current status.
    pub fn apply(&self, event: LineEvent) -> Option<LineStatus> {
        let mut state = self.state();
        if event == LineEvent::Resume && !state.resumable {
            return None;
        }
        let next = state.status.apply(event)?;
        state.status = next;
        state.resumable = event == LineEvent::Exhausted;
        Some(next)
    }

    /// Start a new attempt under a fresh correlation id.
    pub(crate) fn begin_attempt(&self, uid: &str) -> Option<LineStatus> {
        let mut state = self.state();
        let next = state.status.apply(LineEvent::Submit)?;
        state.status = next;
        state.uid = Some(uid.to_string());
        state.transaction_id = None;
        state.resumable = false;
        Some(next)
    }

    pub fn snapshot(&self) -> LineSnapshot {
        let state = self.state();
        LineSnapshot {
            cid: state.cid.clone(),
            order_ref: state.order_ref.clone(),
            amount: state.amount,
            currency: state.currency.clone(),
            mollie_uid: state.uid.clone(),
            transaction_id: state.transaction_id.clone(),
            status: state.status,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
