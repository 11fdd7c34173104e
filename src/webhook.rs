//! Mollie webhook receiver.
//!
//! Mollie posts `id=tr_…` to `/pos_mollie/webhook/` whenever a payment
//! changes. The handler refreshes the stored payment and notifies the POS
//! session that owns it. A 5xx answer makes Mollie retry later.

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::DbState;
use crate::mollie::MollieClient;
use crate::payments;
use crate::terminal::bus::NotificationBus;

#[derive(Clone)]
pub struct WebhookState {
    pub db: Arc<DbState>,
    pub client: MollieClient,
    pub bus: NotificationBus,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookForm {
    #[serde(default)]
    pub id: Option<String>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/pos_mollie/webhook", post(mollie_webhook))
        .route("/pos_mollie/webhook/", post(mollie_webhook))
        .with_state(state)
}

/// Serve the webhook router until `shutdown` is cancelled.
pub async fn serve(
    state: WebhookState,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Mollie webhook server running on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Mollie webhook server stopped");
    Ok(())
}

pub async fn mollie_webhook(
    State(state): State<WebhookState>,
    Form(form): Form<WebhookForm>,
) -> Response {
    let Some(id) = form.id.filter(|id| !id.trim().is_empty()) else {
        return StatusCode::OK.into_response();
    };

    match payments::process_webhook(&state.db, &state.client, &state.bus, id.trim()).await {
        Ok(_) => (StatusCode::OK, "").into_response(),
        Err(err) => {
            error!("mollie webhook for {id} failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, err).into_response()
        }
    }
}
