//! Mollie point-of-sale terminal payments.
//!
//! The POS submits a payment line to a Mollie terminal and waits for the
//! customer to pay; confirmation comes from Mollie's webhook (pushed over
//! the notification bus) or from status polling, whichever is first.

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mollie;
pub mod payments;
pub mod status_poll;
pub mod storage;
pub mod terminal;
pub mod terminals;
pub mod webhook;

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::LocalBackend;
use crate::config::AppConfig;
use crate::db::DbState;
use crate::error::TerminalError;
use crate::mollie::MollieClient;
use crate::terminal::{create_terminal, NotificationBus, Operator, TerminalManager};
use crate::webhook::WebhookState;

/// Everything a running terminal service shares.
pub struct Service {
    pub config: AppConfig,
    pub db: Arc<DbState>,
    pub client: MollieClient,
    pub bus: NotificationBus,
    pub backend: Arc<LocalBackend>,
    pub terminals: TerminalManager,
}

impl Service {
    /// Open the database and build the Mollie client.
    pub fn build(config: AppConfig) -> Result<Self> {
        let db = Arc::new(db::init(&config.data_dir).map_err(|e| anyhow!(e))?);
        let client = MollieClient::new(&config.api_base_url, &config.api_key, config.http_timeout)
            .context("failed to build Mollie client")?;
        let backend = Arc::new(LocalBackend::new(
            db.clone(),
            client.clone(),
            &config.webhook_base_url,
        ));
        Ok(Self {
            config,
            db,
            client,
            bus: NotificationBus::new(),
            backend,
            terminals: TerminalManager::new(),
        })
    }

    /// Attach a Mollie terminal to a POS payment method.
    pub fn register_terminal(
        &self,
        method_id: i64,
        operator: Arc<dyn Operator>,
    ) -> Result<(), TerminalError> {
        let terminal = create_terminal(
            "mollie",
            method_id,
            &self.config.session_key,
            self.backend.clone(),
            operator,
            self.bus.clone(),
            self.config.poll,
        )?;
        self.terminals.register(method_id, terminal);
        Ok(())
    }

    pub fn webhook_state(&self) -> WebhookState {
        WebhookState {
            db: self.db.clone(),
            client: self.client.clone(),
            bus: self.bus.clone(),
        }
    }

    /// Import the account's terminals, logging instead of failing.
    pub async fn sync_terminals(&self) {
        match terminals::sync_terminals(&self.db, &self.client, &self.config.accepted_currencies)
            .await
        {
            Ok(summary) => info!(
                created = summary.created,
                updated = summary.updated,
                "Startup terminal sync finished"
            ),
            Err(e) => warn!("Startup terminal sync failed: {e}"),
        }
    }
}

/// Service entry point: serve Mollie's webhook until Ctrl-C.
pub async fn run() -> Result<()> {
    let config = config::load()?;
    let _guard = logging::init_logging(&config.log_dir)?;

    info!("Starting Mollie POS terminal v{}", env!("CARGO_PKG_VERSION"));

    let port = config.webhook_port;
    let service = Service::build(config)?;
    if service.config.sync_on_start {
        service.sync_terminals().await;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
        }
        info!("Shutdown requested");
        signal.cancel();
    });

    let served = webhook::serve(service.webhook_state(), port, shutdown).await;
    service.terminals.shutdown();
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::coordinator::tests::TestOperator;
    use crate::terminal::protocol::PollSettings;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(data_dir: PathBuf) -> AppConfig {
        AppConfig {
            api_key: "test_key".into(),
            api_base_url: "http://127.0.0.1:9/".into(),
            http_timeout: Duration::from_secs(1),
            webhook_base_url: "https://pos.test".into(),
            webhook_port: 0,
            session_key: "config-1".into(),
            poll: PollSettings::default(),
            qr_poll_interval: Duration::from_secs(5),
            qr_max_polls: None,
            accepted_currencies: vec!["EUR".into()],
            log_dir: data_dir.join("logs"),
            data_dir,
            sync_on_start: false,
        }
    }

    #[test]
    fn test_build_and_register() {
        let dir = tempfile::tempdir().unwrap();
        let service = Service::build(config(dir.path().to_path_buf())).unwrap();
        assert!(service.db.db_path.ends_with(db::DB_FILE_NAME));

        service
            .register_terminal(4, TestOperator::answering(false))
            .unwrap();
        assert_eq!(service.terminals.registered_method_ids(), vec![4]);
        assert_eq!(service.webhook_state().bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_startup_sync_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let service = Service::build(config(dir.path().to_path_buf())).unwrap();
        service.sync_terminals().await;
        assert!(terminals::list_terminals(&service.db, false)
            .unwrap()
            .is_empty());
    }
}
