//! Mollie API client.
//!
//! Every call goes to `{base}/v2/{endpoint}` with the terminal API key as a
//! bearer token. Payment calls are "silent": they never fail and hand back
//! whatever JSON Mollie (or the transport) produced, so the caller can show
//! Mollie's own error message. Terminal listing is strict and returns a
//! `MollieError`.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};

use super::payload::PaymentPayload;
use crate::error::MollieError;

pub const DEFAULT_BASE_URL: &str = "https://api.mollie.com/";

/// Default timeout for Mollie requests (60 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Error body returned by silent calls when Mollie could not be reached.
const GENERIC_FAILURE: &str = "Something went wrong";

/// Upper bound on `_links.next` hops while listing terminals.
const MAX_PAGES: usize = 100;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach Mollie at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid Mollie URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Mollie API key is invalid".to_string(),
        403 => "Mollie API key is not allowed to use terminals".to_string(),
        404 => "Mollie resource not found".to_string(),
        422 => "Mollie rejected the request".to_string(),
        s if s >= 500 => format!("Mollie server error (HTTP {s})"),
        s => format!("Unexpected response from Mollie (HTTP {s})"),
    }
}

/// Error JSON a silent call hands back for a failed strict call.
fn silent_body(err: MollieError) -> Value {
    match err {
        MollieError::Http { details, .. } if !details.is_null() => details,
        MollieError::Http { status, .. } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            json!({ "status": status.as_u16(), "detail": status_error(status) })
        }
        _ => json!({ "error": GENERIC_FAILURE }),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MollieClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl MollieClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, MollieError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MollieError::Client(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/v2/{}", self.base_url, endpoint.trim_matches('/'))
    }

    /// Strict call against an absolute URL.
    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Value, MollieError> {
        info!(method = %method, url = %url, "Mollie POS terminal call");

        let mut req = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| MollieError::Transport(friendly_error(url, &e)))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| MollieError::Transport(friendly_error(url, &e)))?;

        if !status.is_success() {
            let details = if body_text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str::<Value>(&body_text)
                    .unwrap_or_else(|_| Value::String(body_text.trim().to_string()))
            };
            error!(status = status.as_u16(), %details, "MOLLIE-POS-ERROR");
            return Err(MollieError::Http {
                status: status.as_u16(),
                details,
            });
        }

        // Empty bodies (204) come back as null.
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| MollieError::Decode(e.to_string()))
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<Value, MollieError> {
        let url = self.endpoint_url(endpoint);
        self.request(method, &url, body).await
    }

    async fn call_silent<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Value {
        match self.call(method, endpoint, body).await {
            Ok(value) => value,
            Err(e) => {
                if !matches!(e, MollieError::Http { .. }) {
                    warn!(endpoint = %endpoint, error = %e, "unable to communicate with Mollie");
                }
                silent_body(e)
            }
        }
    }

    /// `POST /payments`. Returns the payment object or Mollie's error body.
    pub async fn create_payment(&self, payload: &PaymentPayload) -> Value {
        self.call_silent(Method::POST, "/payments", Some(payload))
            .await
    }

    /// `GET /payments/{id}`.
    pub async fn get_payment(&self, transaction_id: &str) -> Value {
        self.call_silent::<()>(Method::GET, &format!("/payments/{transaction_id}"), None)
            .await
    }

    /// `DELETE /payments/{id}`.
    pub async fn cancel_payment(&self, transaction_id: &str) -> Value {
        self.call_silent::<()>(Method::DELETE, &format!("/payments/{transaction_id}"), None)
            .await
    }

    /// `GET /terminals`, following `_links.next` until the last page.
    pub async fn list_terminals(&self) -> Result<Vec<Value>, MollieError> {
        let mut terminals = Vec::new();
        let mut url = self.endpoint_url("/terminals");

        for _ in 0..MAX_PAGES {
            let page = self.request::<()>(Method::GET, &url, None).await?;
            if let Some(items) = page
                .pointer("/_embedded/terminals")
                .and_then(Value::as_array)
            {
                terminals.extend(items.iter().cloned());
            }

            match page
                .pointer("/_links/next/href")
                .and_then(Value::as_str)
            {
                Some(next) if !next.is_empty() => url = next.to_string(),
                _ => return Ok(terminals),
            }
        }

        Err(MollieError::Decode(format!(
            "terminal listing did not end after {MAX_PAGES} pages"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::terminal::protocol::PaymentRequest;
    use axum::extract::{Path, Query};
    use axum::http::{header, HeaderMap};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    /// Serve `router` on an ephemeral port and return its base URL.
    pub(crate) async fn spawn_mock(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral TCP port for test");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}/")
    }

    fn client(base: &str) -> MollieClient {
        MollieClient::new(base, "test_key", Duration::from_secs(5)).unwrap()
    }

    fn payload() -> PaymentPayload {
        let request = PaymentRequest {
            mollie_uid: "uid-1".into(),
            description: "Shop/0001".into(),
            order_id: "ord-1".into(),
            currency: "EUR".into(),
            amount: 1250,
            session_key: "config-1".into(),
        };
        crate::mollie::payload::prepare_payment_payload(&request, "term_1", "https://pos.test")
    }

    #[test]
    fn test_endpoint_url() {
        let c = client(DEFAULT_BASE_URL);
        assert_eq!(
            c.endpoint_url("/payments/tr_1"),
            "https://api.mollie.com/v2/payments/tr_1"
        );
        assert_eq!(c.endpoint_url("terminals"), "https://api.mollie.com/v2/terminals");
    }

    #[test]
    fn test_status_error_messages() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED),
            "Mollie API key is invalid"
        );
        assert!(status_error(StatusCode::BAD_GATEWAY).contains("502"));
    }

    #[tokio::test]
    async fn test_create_payment_sends_bearer_and_payload() {
        let router = Router::new().route(
            "/v2/payments",
            axum::routing::post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                (
                    axum::http::StatusCode::CREATED,
                    Json(json!({
                        "id": "tr_1",
                        "status": "open",
                        "auth": auth,
                        "echo": body,
                    })),
                )
            }),
        );
        let base = spawn_mock(router).await;

        let resp = client(&base).create_payment(&payload()).await;
        assert_eq!(resp["status"], "open");
        assert_eq!(resp["auth"], "Bearer test_key");
        assert_eq!(resp["echo"]["amount"]["value"], "12.50");
        assert_eq!(resp["echo"]["metadata"]["mollie_uid"], "uid-1");
    }

    #[tokio::test]
    async fn test_silent_call_returns_mollie_error_body() {
        let router = Router::new().route(
            "/v2/payments",
            axum::routing::post(|| async {
                (
                    axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({
                        "status": 422,
                        "title": "Unprocessable Entity",
                        "detail": "The terminal is not active",
                    })),
                )
            }),
        );
        let base = spawn_mock(router).await;

        let resp = client(&base).create_payment(&payload()).await;
        assert_eq!(resp["detail"], "The terminal is not active");
    }

    #[tokio::test]
    async fn test_silent_call_unreachable() {
        // Nothing listens on the discard port.
        let resp = client("http://127.0.0.1:9/").get_payment("tr_1").await;
        assert_eq!(resp, json!({"error": GENERIC_FAILURE}));
    }

    #[tokio::test]
    async fn test_get_and_cancel_payment() {
        let router = Router::new().route(
            "/v2/payments/:id",
            get(|Path(id): Path<String>| async move { Json(json!({"id": id, "status": "paid"})) })
                .delete(|Path(id): Path<String>| async move {
                    Json(json!({"id": id, "status": "canceled"}))
                }),
        );
        let base = spawn_mock(router).await;
        let c = client(&base);

        assert_eq!(c.get_payment("tr_9").await["status"], "paid");
        assert_eq!(c.cancel_payment("tr_9").await["status"], "canceled");
    }

    #[tokio::test]
    async fn test_list_terminals_follows_next_links() {
        let router = Router::new().route(
            "/v2/terminals",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    let host = headers
                        .get(header::HOST)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    match q.get("from").map(String::as_str) {
                        None => Json(json!({
                            "count": 1,
                            "_embedded": {"terminals": [{"id": "term_1"}]},
                            "_links": {"next": {"href": format!("http://{host}/v2/terminals?from=term_2")}},
                        })),
                        Some(_) => Json(json!({
                            "count": 1,
                            "_embedded": {"terminals": [{"id": "term_2"}]},
                            "_links": {"next": null},
                        })),
                    }
                },
            ),
        );
        let base = spawn_mock(router).await;

        let terminals = client(&base).list_terminals().await.unwrap();
        let ids: Vec<_> = terminals.iter().map(|t| t["id"].clone()).collect();
        assert_eq!(ids, vec![json!("term_1"), json!("term_2")]);
    }

    #[tokio::test]
    async fn test_list_terminals_is_strict() {
        let router = Router::new().route(
            "/v2/terminals",
            get(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({"status": 401, "detail": "Missing authentication"})),
                )
            }),
        );
        let base = spawn_mock(router).await;

        match client(&base).list_terminals().await {
            Err(MollieError::Http { status, details }) => {
                assert_eq!(status, 401);
                assert_eq!(details["detail"], "Missing authentication");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
