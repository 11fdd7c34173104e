//! Terminal payment records.
//!
//! One row in `mollie_terminal_payments` per payment request Mollie
//! accepted. The row keeps Mollie's latest payment object, which is what
//! the POS reads when it checks a payment's status. Mollie's webhook
//! refreshes it and wakes the waiting POS session through the bus.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::mollie::MollieClient;
use crate::terminal::bus::{BusMessage, NotificationBus};
use crate::terminal::protocol::PaymentRequest;

/// Stored terminal payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalPaymentRecord {
    pub id: i64,
    pub transaction_id: String,
    pub mollie_uid: String,
    pub terminal_id: Option<i64>,
    pub session_key: String,
    pub status: String,
    pub latest_response: Value,
}

/// How a payment record is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentLookup<'a> {
    Transaction(&'a str),
    Uid(&'a str),
}

fn find_payment(
    conn: &Connection,
    lookup: PaymentLookup<'_>,
) -> Result<Option<TerminalPaymentRecord>, String> {
    let (column, value) = match lookup {
        PaymentLookup::Transaction(id) => ("transaction_id", id),
        PaymentLookup::Uid(uid) => ("mollie_uid", uid),
    };
    if value.is_empty() {
        return Ok(None);
    }
    conn.query_row(
        &format!(
            "SELECT id, transaction_id, mollie_uid, terminal_id, session_key, status, latest_response
             FROM mollie_terminal_payments WHERE {column} = ?1
             ORDER BY id DESC LIMIT 1"
        ),
        params![value],
        |row| {
            let raw: String = row.get(6)?;
            Ok(TerminalPaymentRecord {
                id: row.get(0)?,
                transaction_id: row.get(1)?,
                mollie_uid: row.get(2)?,
                terminal_id: row.get(3)?,
                session_key: row.get(4)?,
                status: row.get(5)?,
                latest_response: serde_json::from_str(&raw).unwrap_or_else(|_| json!({})),
            })
        },
    )
    .optional()
    .map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Record / query
// ---------------------------------------------------------------------------

/// Store Mollie's answer to a payment request. Only accepted (`open`)
/// payments are recorded. Returns whether a row was written.
pub fn record_payment_request(
    db: &DbState,
    response: &Value,
    request: &PaymentRequest,
    terminal_row_id: i64,
) -> Result<bool, String> {
    if response.get("status").and_then(Value::as_str) != Some("open") {
        return Ok(false);
    }
    let transaction_id = response
        .get("id")
        .and_then(Value::as_str)
        .ok_or("Mollie accepted the payment without an id")?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO mollie_terminal_payments
            (transaction_id, mollie_uid, terminal_id, session_key, status, latest_response)
         VALUES (?1, ?2, ?3, ?4, 'open', ?5)",
        params![
            transaction_id,
            request.mollie_uid,
            terminal_row_id,
            request.session_key,
            response.to_string()
        ],
    )
    .map_err(|e| format!("record_payment_request: {e}"))?;

    info!(
        transaction = %transaction_id,
        uid = %request.mollie_uid,
        "Mollie terminal payment recorded"
    );
    Ok(true)
}

/// Latest Mollie payment object for a payment, or `{}` when unknown.
pub fn get_payment_status(db: &DbState, lookup: PaymentLookup<'_>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(find_payment(&conn, lookup)?
        .map(|p| p.latest_response)
        .unwrap_or_else(|| json!({})))
}

pub fn get_payment(
    db: &DbState,
    lookup: PaymentLookup<'_>,
) -> Result<Option<TerminalPaymentRecord>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    find_payment(&conn, lookup)
}

// ---------------------------------------------------------------------------
// Webhook / cancel
// ---------------------------------------------------------------------------

/// Handle a Mollie webhook call for `transaction_id`.
///
/// Unknown ids are ignored. Otherwise the payment is fetched from Mollie;
/// when the answer carries a status it replaces the stored response and a
/// `TERMINAL_RESPONSE` for the payment's POS session goes out on the bus.
/// Returns whether the record was updated.
pub async fn process_webhook(
    db: &DbState,
    client: &MollieClient,
    bus: &NotificationBus,
    transaction_id: &str,
) -> Result<bool, String> {
    let Some(record) = get_payment(db, PaymentLookup::Transaction(transaction_id))? else {
        debug!(transaction = %transaction_id, "webhook for unknown payment ignored");
        return Ok(false);
    };

    let payment = client.get_payment(transaction_id).await;
    let Some(status) = payment.get("status").and_then(Value::as_str) else {
        warn!(transaction = %transaction_id, response = %payment, "webhook payment fetch returned no status");
        return Ok(false);
    };

    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE mollie_terminal_payments
             SET status = ?1, latest_response = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![status, payment.to_string(), record.id],
        )
        .map_err(|e| format!("process_webhook: {e}"))?;
    }

    info!(
        transaction = %transaction_id,
        uid = %record.mollie_uid,
        from = %record.status,
        to = %status,
        "Mollie terminal payment updated"
    );
    bus.publish(BusMessage::terminal_response(&record.session_key));
    Ok(true)
}

/// Cancel an open payment at Mollie. Returns Mollie's answer, or `{}` when
/// the payment is unknown or no longer open.
pub async fn cancel_payment_request(
    db: &DbState,
    client: &MollieClient,
    lookup: PaymentLookup<'_>,
) -> Result<Value, String> {
    match get_payment(db, lookup)? {
        Some(record) if record.status == "open" => {
            info!(transaction = %record.transaction_id, "Cancelling Mollie terminal payment");
            Ok(client.cancel_payment(&record.transaction_id).await)
        }
        _ => Ok(json!({})),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
