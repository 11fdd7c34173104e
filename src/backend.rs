//! In-process backend for the terminal coordinator.
//!
//! Resolves the Mollie terminal of a POS payment method, forwards payment
//! requests to Mollie and answers status checks from the local payment
//! records, which Mollie's webhook keeps current.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::db::DbState;
use crate::error::BackendError;
use crate::mollie::{prepare_payment_payload, MollieClient};
use crate::payments::{self, PaymentLookup};
use crate::terminal::protocol::{PaymentRequest, ProviderResponse, TerminalBackend};
use crate::terminals;

pub struct LocalBackend {
    db: Arc<DbState>,
    client: MollieClient,
    webhook_base_url: String,
}

impl LocalBackend {
    pub fn new(db: Arc<DbState>, client: MollieClient, webhook_base_url: &str) -> Self {
        Self {
            db,
            client,
            webhook_base_url: webhook_base_url.to_string(),
        }
    }
}

#[async_trait]
impl TerminalBackend for LocalBackend {
    async fn submit_payment_request(
        &self,
        method_id: i64,
        request: &PaymentRequest,
    ) -> Result<ProviderResponse, BackendError> {
        let terminal =
            terminals::terminal_for_method(&self.db, method_id).map_err(BackendError::Storage)?;
        let Some(terminal) = terminal else {
            warn!(method_id, "payment request for method without Mollie terminal");
            return Ok(ProviderResponse {
                status: None,
                id: None,
                detail: Some(format!(
                    "No Mollie terminal configured for payment method {method_id}"
                )),
            });
        };

        let payload = prepare_payment_payload(request, &terminal.terminal_id, &self.webhook_base_url);
        let response = self.client.create_payment(&payload).await;
        payments::record_payment_request(&self.db, &response, request, terminal.id)
            .map_err(BackendError::Storage)?;

        Ok(ProviderResponse::from_value(&response))
    }

    async fn get_payment_status(
        &self,
        mollie_uid: &str,
    ) -> Result<Option<ProviderResponse>, BackendError> {
        let value = payments::get_payment_status(&self.db, PaymentLookup::Uid(mollie_uid))
            .map_err(BackendError::Storage)?;
        if value.as_object().map_or(true, |o| o.is_empty()) {
            return Ok(None);
        }
        Ok(Some(ProviderResponse::from_value(&value)))
    }
}
