//! Terminal manager: routes POS payment methods to terminal integrations.
//!
//! Each POS payment method that uses a payment terminal gets one
//! `PaymentTerminal` registered under its id. The POS hands payment lines
//! to the manager, which forwards them to the right terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use super::bus::NotificationBus;
use super::coordinator::MollieTerminal;
use super::line::PaymentLine;
use super::protocol::*;
use crate::error::TerminalError;

/// Build a terminal integration by provider name.
pub fn create_terminal(
    provider: &str,
    method_id: i64,
    session_key: &str,
    backend: Arc<dyn TerminalBackend>,
    operator: Arc<dyn Operator>,
    bus: NotificationBus,
    settings: PollSettings,
) -> Result<Arc<dyn PaymentTerminal>, TerminalError> {
    match provider.to_lowercase().as_str() {
        "mollie" => Ok(Arc::new(MollieTerminal::new(
            method_id,
            session_key,
            backend,
            operator,
            bus,
            settings,
        ))),
        other => Err(TerminalError::UnsupportedProvider(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Terminal Manager
// ---------------------------------------------------------------------------

/// Thread-safe registry of terminals keyed by POS payment method id.
pub struct TerminalManager {
    terminals: Mutex<HashMap<i64, Arc<dyn PaymentTerminal>>>,
}

impl TerminalManager {
    pub fn new() -> Self {
        Self {
            terminals: Mutex::new(HashMap::new()),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<i64, Arc<dyn PaymentTerminal>>> {
        self.terminals.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `terminal` for a payment method, replacing any previous one.
    pub fn register(&self, method_id: i64, terminal: Arc<dyn PaymentTerminal>) {
        let name = terminal.name().to_string();
        if self.map().insert(method_id, terminal).is_some() {
            info!("Payment method {method_id} terminal replaced ({name})");
        } else {
            info!("Payment method {method_id} terminal registered ({name})");
        }
    }

    pub fn unregister(&self, method_id: i64) -> bool {
        let removed = self.map().remove(&method_id).is_some();
        if removed {
            info!("Payment method {method_id} terminal unregistered");
        }
        removed
    }

    pub fn is_registered(&self, method_id: i64) -> bool {
        self.map().contains_key(&method_id)
    }

    pub fn registered_method_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.map().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // The map lock is released before the terminal is awaited.
    fn terminal(&self, method_id: i64) -> Result<Arc<dyn PaymentTerminal>, TerminalError> {
        self.map()
            .get(&method_id)
            .cloned()
            .ok_or(TerminalError::UnknownPaymentMethod(method_id))
    }

    /// Submit and confirm the payment on `line` through the method's terminal.
    pub async fn send_payment_request(
        &self,
        method_id: i64,
        line: &PaymentLine,
    ) -> Result<bool, TerminalError> {
        let terminal = self.terminal(method_id)?;
        terminal.send_payment_request(line).await
    }

    /// Ask the method's terminal to force-cancel the payment on `line`.
    pub async fn cancel_payment(
        &self,
        method_id: i64,
        line: &PaymentLine,
    ) -> Result<bool, TerminalError> {
        let terminal = self.terminal(method_id)?;
        Ok(terminal.cancel_payment(line).await)
    }

    /// Drop every terminal (service shutdown).
    pub fn shutdown(&self) {
        let mut terminals = self.map();
        let count = terminals.len();
        terminals.clear();
        info!("TerminalManager shutdown: {count} terminals released");
    }
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::coordinator::tests::{status, ScriptedBackend, TestOperator};
    use crate::terminal::line::LineStatus;

    fn mollie(method_id: i64, backend: Arc<ScriptedBackend>) -> Arc<dyn PaymentTerminal> {
        create_terminal(
            "Mollie",
            method_id,
            "config-1",
            backend,
            TestOperator::answering(true),
            NotificationBus::new(),
            PollSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_terminal_manager_new() {
        let mgr = TerminalManager::new();
        assert!(mgr.registered_method_ids().is_empty());
        assert!(!mgr.is_registered(1));
    }

    #[test]
    fn test_create_terminal_unknown_provider() {
        let result = create_terminal(
            "adyen",
            1,
            "config-1",
            Arc::new(ScriptedBackend::default()),
            TestOperator::answering(false),
            NotificationBus::new(),
            PollSettings::default(),
        );
        assert!(matches!(
            result,
            Err(TerminalError::UnsupportedProvider(p)) if p == "adyen"
        ));
    }

    #[test]
    fn test_register_and_unregister() {
        let mgr = TerminalManager::new();
        mgr.register(7, mollie(7, Arc::new(ScriptedBackend::default())));
        mgr.register(2, mollie(2, Arc::new(ScriptedBackend::default())));
        assert_eq!(mgr.registered_method_ids(), vec![2, 7]);

        assert!(mgr.unregister(7));
        assert!(!mgr.unregister(7));
        assert!(mgr.is_registered(2));

        mgr.shutdown();
        assert!(mgr.registered_method_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_routes_payment_to_method_terminal() {
        let backend = ScriptedBackend::accepting("tr_1");
        backend.set_current(status(ProviderStatus::Paid));
        let mgr = TerminalManager::new();
        mgr.register(4, mollie(4, backend.clone()));

        let line = PaymentLine::new("ord-1", "Shop/0001", 1000, "EUR");
        assert_eq!(
            mgr.send_payment_request(5, &line).await,
            Err(TerminalError::UnknownPaymentMethod(5))
        );
        assert_eq!(mgr.send_payment_request(4, &line).await, Ok(true));
        assert_eq!(line.status(), LineStatus::Done);
        assert_eq!(backend.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_routes_to_terminal() {
        let backend = ScriptedBackend::accepting("tr_2");
        let terminal = mollie(4, backend);
        let mgr = TerminalManager::new();
        mgr.register(4, terminal.clone());

        let line = PaymentLine::new("ord-2", "Shop/0002", 1000, "EUR");
        // Nothing submitted yet, so nothing to cancel.
        assert_eq!(mgr.cancel_payment(4, &line).await, Ok(false));

        terminal.submit_payment(&line).await.unwrap();
        assert_eq!(mgr.cancel_payment(4, &line).await, Ok(true));
        assert_eq!(line.status(), LineStatus::Retry);
        assert!(mgr.cancel_payment(9, &line).await.is_err());
    }
}
