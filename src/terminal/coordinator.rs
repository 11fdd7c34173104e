//! Mollie terminal payment coordinator.
//!
//! Drives one payment line from submission to a final status. After Mollie
//! accepts the request, two channels race to confirm it: a push message on
//! the notification bus (sent when Mollie calls our webhook) and a status
//! poll every few seconds. Both funnel into the same `PendingConfirmations`
//! entry, so the first one to see a final status wins and the other
//! becomes a no-op.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bus::NotificationBus;
use super::line::{LineEvent, LineStatus, PaymentLine};
use super::pending::{PendingConfirmations, Resolution};
use super::protocol::*;
use crate::error::{BackendError, TerminalError};

const ERROR_TITLE: &str = "Mollie Error";
const CONNECTIVITY_MESSAGE: &str =
    "Could not connect to the payment server, please check your internet connection and try again.";
const TIMEOUT_MESSAGE: &str =
    "No confirmation was received from the terminal. Check the device before retrying.";
const REJECTED_FALLBACK: &str = "Mollie could not start the terminal payment.";

// ---------------------------------------------------------------------------
// Attempt context
// ---------------------------------------------------------------------------

/// Poll bookkeeping for one confirmation wait. Lives on the waiting call's
/// stack and dies with it.
#[derive(Debug)]
struct AttemptContext {
    budget: u32,
    remaining: u32,
    failures: u32,
}

impl AttemptContext {
    fn new(retries: u32) -> Self {
        Self {
            budget: retries,
            remaining: retries,
            failures: 0,
        }
    }

    fn record_success(&mut self) {
        self.remaining = self.budget;
        self.failures = 0;
    }

    /// Count a failed status check. Returns `false` once the budget is spent.
    fn record_failure(&mut self) -> bool {
        self.failures += 1;
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

fn resolution_for(status: ProviderStatus) -> Option<Resolution> {
    match status {
        ProviderStatus::Paid => Some(Resolution::Paid),
        ProviderStatus::Expired | ProviderStatus::Canceled | ProviderStatus::Failed => {
            Some(Resolution::NotPaid(status))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Mollie point-of-sale terminal attached to one POS payment method.
pub struct MollieTerminal {
    method_id: i64,
    session_key: String,
    backend: Arc<dyn TerminalBackend>,
    operator: Arc<dyn Operator>,
    bus: NotificationBus,
    pending: PendingConfirmations,
    settings: PollSettings,
}

impl MollieTerminal {
    pub fn new(
        method_id: i64,
        session_key: &str,
        backend: Arc<dyn TerminalBackend>,
        operator: Arc<dyn Operator>,
        bus: NotificationBus,
        settings: PollSettings,
    ) -> Self {
        Self {
            method_id,
            session_key: session_key.to_string(),
            backend,
            operator,
            bus,
            pending: PendingConfirmations::new(),
            settings,
        }
    }

    pub fn method_id(&self) -> i64 {
        self.method_id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn pending(&self) -> &PendingConfirmations {
        &self.pending
    }

    /// Resume waiting on a line whose last attempt ran out of status checks.
    /// The payment may still be running on the device, so the same
    /// correlation id is reused and nothing is re-submitted.
    pub async fn resume_payment(&self, line: &PaymentLine) -> Result<bool, TerminalError> {
        if line.apply(LineEvent::Resume).is_none() {
            return Err(TerminalError::NotResumable);
        }
        info!(
            uid = ?line.uid(),
            order = %line.order_ref(),
            "Resuming terminal payment confirmation"
        );
        self.await_confirmation(line).await
    }

    /// Run the push path for every pending wait of `session_key`, as if a
    /// bus message had arrived. Returns how many waits were resolved.
    pub async fn notify_terminal_response(&self, session_key: &str) -> usize {
        if session_key != self.session_key {
            return 0;
        }
        let mut resolved = 0;
        for uid in self.pending.pending_uids() {
            if self.check_push(&uid).await {
                resolved += 1;
            }
        }
        resolved
    }

    fn show_error(&self, message: &str) {
        self.operator.show_error(ERROR_TITLE, message);
    }

    /// One status check, bounded by the request timeout.
    async fn fetch_resolution(&self, uid: &str) -> Result<Option<Resolution>, BackendError> {
        let response = time::timeout(
            self.settings.request_timeout,
            self.backend.get_payment_status(uid),
        )
        .await
        .map_err(|_| {
            BackendError::Transport(format!(
                "status check timed out after {}ms",
                self.settings.request_timeout.as_millis()
            ))
        })??;

        Ok(response
            .and_then(|r| r.status)
            .and_then(resolution_for))
    }

    /// Push path. Transport failures are left to the poll path.
    async fn check_push(&self, uid: &str) -> bool {
        match self.fetch_resolution(uid).await {
            Ok(Some(resolution)) => self.pending.resolve(uid, resolution),
            Ok(None) => {
                debug!(uid = %uid, "terminal response received, status not final yet");
                false
            }
            Err(e) => {
                warn!(uid = %uid, error = %e, "status check after terminal response failed");
                false
            }
        }
    }

    /// Poll path.
    async fn poll_once(&self, uid: &str, attempt: &mut AttemptContext) {
        match self.fetch_resolution(uid).await {
            Ok(resolution) => {
                attempt.record_success();
                if let Some(resolution) = resolution {
                    self.pending.resolve(uid, resolution);
                }
            }
            Err(e) => {
                if attempt.record_failure() {
                    warn!(
                        uid = %uid,
                        error = %e,
                        remaining = attempt.remaining,
                        "payment status poll failed, retrying"
                    );
                } else {
                    warn!(
                        uid = %uid,
                        error = %e,
                        failures = attempt.failures,
                        "payment status poll failed, giving up"
                    );
                    self.pending.resolve(
                        uid,
                        Resolution::Exhausted {
                            attempts: attempt.failures,
                        },
                    );
                }
            }
        }
    }

    /// Race the push and poll channels until the wait for `uid` resolves.
    /// The bus listener and the poll timer are dropped when this returns,
    /// on every path.
    async fn wait_for_resolution(
        &self,
        uid: &str,
        mut resolved: oneshot::Receiver<Resolution>,
    ) -> Resolution {
        let mut push = self.bus.subscribe();
        let mut push_open = true;

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ceiling = time::sleep(self.settings.max_wait);
        tokio::pin!(ceiling);

        let mut attempt = AttemptContext::new(self.settings.retries);

        loop {
            tokio::select! {
                biased;

                res = &mut resolved => {
                    // The sender only disappears through `resolve`, which
                    // always sends first.
                    break res.unwrap_or(Resolution::ForceCancelled);
                }
                msg = push.recv(), if push_open => match msg {
                    Ok(msg) if msg.is_terminal_response_for(&self.session_key) => {
                        self.check_push(uid).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(uid = %uid, skipped, "notification bus lagged, checking status");
                        self.check_push(uid).await;
                    }
                    Err(RecvError::Closed) => {
                        warn!(uid = %uid, "notification bus closed, polling only");
                        push_open = false;
                    }
                },
                _ = ticker.tick() => {
                    self.poll_once(uid, &mut attempt).await;
                }
                () = &mut ceiling => {
                    self.pending.resolve(uid, Resolution::TimedOut);
                }
            }
        }
    }

    /// Apply a resolution to the line and turn it into the caller's result.
    /// When the line has already moved on, the result follows the line.
    fn settle(
        &self,
        line: &PaymentLine,
        uid: &str,
        resolution: Resolution,
    ) -> Result<bool, TerminalError> {
        let event = match resolution {
            Resolution::Paid => LineEvent::Paid,
            Resolution::NotPaid(_) => LineEvent::NotPaid,
            Resolution::ForceCancelled => LineEvent::ForceCancelled,
            Resolution::Exhausted { .. } => LineEvent::Exhausted,
            Resolution::TimedOut => LineEvent::TimedOut,
        };
        if line.apply(event).is_none() {
            let status = line.status();
            if resolution != Resolution::ForceCancelled {
                warn!(
                    uid = %uid,
                    ?resolution,
                    status = %status,
                    "line settled elsewhere, keeping its status"
                );
            }
            return Ok(status == LineStatus::Done);
        }

        match resolution {
            Resolution::Paid => {
                info!(uid = %uid, transaction = ?line.transaction_id(), "Terminal payment paid");
                Ok(true)
            }
            Resolution::NotPaid(status) => {
                info!(uid = %uid, status = %status, "Terminal payment not paid");
                Ok(false)
            }
            Resolution::ForceCancelled => {
                info!(uid = %uid, "Terminal payment force-cancelled");
                Ok(false)
            }
            Resolution::Exhausted { attempts } => {
                self.show_error(CONNECTIVITY_MESSAGE);
                Err(TerminalError::Exhausted { attempts })
            }
            Resolution::TimedOut => {
                self.show_error(TIMEOUT_MESSAGE);
                Err(TerminalError::TimedOut)
            }
        }
    }
}

#[async_trait]
impl PaymentTerminal for MollieTerminal {
    fn name(&self) -> &str {
        "mollie"
    }

    async fn submit_payment(&self, line: &PaymentLine) -> Result<Accepted, TerminalError> {
        let uid = Uuid::new_v4().to_string();
        let from = line.status();
        if line.begin_attempt(&uid).is_none() {
            return Err(match from {
                LineStatus::Done => TerminalError::AlreadyPaid,
                other => TerminalError::AttemptInProgress(other),
            });
        }

        if line.amount() <= 0 {
            line.apply(LineEvent::Rejected);
            let err = TerminalError::InvalidAmount;
            self.show_error("Cannot process transactions with negative or zero amount.");
            return Err(err);
        }

        let request = PaymentRequest::for_line(line, &uid, &self.session_key);
        info!(
            uid = %uid,
            order = %request.order_id,
            amount = request.amount,
            currency = %request.currency,
            method_id = self.method_id,
            "Submitting terminal payment"
        );

        let response = match self
            .backend
            .submit_payment_request(self.method_id, &request)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(uid = %uid, error = %e, "payment request did not reach the backend");
                line.apply(LineEvent::Rejected);
                self.show_error(CONNECTIVITY_MESSAGE);
                return Err(TerminalError::Connectivity(e.to_string()));
            }
        };

        if !response.is_open() {
            let detail = response
                .detail
                .clone()
                .unwrap_or_else(|| REJECTED_FALLBACK.to_string());
            warn!(uid = %uid, status = ?response.status, detail = %detail, "payment request rejected");
            line.apply(LineEvent::Rejected);
            self.show_error(&detail);
            return Err(TerminalError::ProviderRejected(detail));
        }

        if let Some(id) = &response.id {
            line.set_transaction_id(id);
        }
        line.apply(LineEvent::Accepted);
        info!(uid = %uid, transaction = ?response.id, "Terminal payment accepted, waiting for card");

        Ok(Accepted {
            mollie_uid: uid,
            transaction_id: response.id,
        })
    }

    async fn await_confirmation(&self, line: &PaymentLine) -> Result<bool, TerminalError> {
        let uid = line.uid().ok_or(TerminalError::NotSubmitted)?;
        let status = line.status();
        if status != LineStatus::WaitingCard {
            return Err(TerminalError::NotWaiting(status));
        }
        // The guard stays alive through `settle`, so a force cancel racing
        // with a resolution that already won leaves the line to this call.
        let (_guard, resolved) = self.pending.register(&uid)?;
        let status = line.status();
        if status != LineStatus::WaitingCard {
            return Err(TerminalError::NotWaiting(status));
        }
        let resolution = self.wait_for_resolution(&uid, resolved).await;
        self.settle(line, &uid, resolution)
    }

    /// Mollie cannot cancel a terminal payment remotely; it has to be
    /// cancelled on the device. Force cancel only releases the line locally.
    ///
    /// Returns `true` only when this call moved the line to retry. A declined
    /// prompt, a line that was never submitted or is no longer waiting, and
    /// a confirmation that already won all return `false`.
    async fn cancel_payment(&self, line: &PaymentLine) -> bool {
        if !self.operator.confirm(&ConfirmPrompt::force_cancel()).await {
            debug!(cid = %line.cid(), "force cancel discarded");
            return false;
        }
        let Some(uid) = line.uid() else {
            debug!(cid = %line.cid(), "force cancel on a line that was never submitted");
            return false;
        };

        if self.pending.resolve(&uid, Resolution::ForceCancelled) {
            line.apply(LineEvent::ForceCancelled);
        } else if self.pending.is_registered(&uid) {
            info!(uid = %uid, "confirmation already received, force cancel ignored");
            return false;
        } else if line.apply(LineEvent::ForceCancelled).is_some() {
            // Release a wait registered after the first check.
            self.pending.resolve(&uid, Resolution::ForceCancelled);
        } else {
            debug!(uid = %uid, status = %line.status(), "nothing to force cancel");
            return false;
        }

        info!(cid = %line.cid(), uid = %uid, "Terminal payment force-cancelled by operator");
        true
    }

    async fn send_payment_request(&self, line: &PaymentLine) -> Result<bool, TerminalError> {
        if line.is_resumable() {
            return self.resume_payment(line).await;
        }
        self.submit_payment(line).await?;
        self.await_confirmation(line).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
