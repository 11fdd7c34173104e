//! Mollie terminal synchronisation and payment method assignment.
//!
//! Terminals are imported from the Mollie account and upserted by their
//! Mollie id. A POS payment method can then be pointed at one active
//! terminal; payment requests for that method are routed to it.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::DbState;
use crate::mollie::MollieClient;

/// A Mollie terminal known locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalRecord {
    pub id: i64,
    pub terminal_id: String,
    pub name: Option<String>,
    pub profile_id: Option<String>,
    pub serial_number: Option<String>,
    pub status: String,
    pub currency: String,
}

impl TerminalRecord {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            terminal_id: row.get(1)?,
            name: row.get(2)?,
            profile_id: row.get(3)?,
            serial_number: row.get(4)?,
            status: row.get(5)?,
            currency: row.get(6)?,
        })
    }
}

const TERMINAL_COLUMNS: &str =
    "id, terminal_id, name, profile_id, serial_number, status, currency";

/// Counts returned by a terminal sync.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
}

/// Terminal fields as Mollie reports them.
#[derive(Debug)]
struct RemoteTerminal {
    terminal_id: String,
    name: Option<String>,
    profile_id: Option<String>,
    serial_number: Option<String>,
    status: String,
    currency: String,
}

fn parse_remote(value: &Value) -> Option<RemoteTerminal> {
    let text = |key: &str| value.get(key).and_then(Value::as_str).map(String::from);
    let terminal_id = text("id")?;
    let status = match text("status").as_deref() {
        Some(s @ ("pending" | "active" | "inactive")) => s.to_string(),
        other => {
            warn!(terminal = %terminal_id, status = ?other, "unknown terminal status, storing as inactive");
            "inactive".to_string()
        }
    };
    Some(RemoteTerminal {
        name: text("description"),
        profile_id: text("profileId"),
        serial_number: text("serialNumber"),
        currency: text("currency").unwrap_or_default(),
        status,
        terminal_id,
    })
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Import every terminal of the Mollie account.
///
/// Fails without writing anything when a terminal uses a currency outside
/// `accepted_currencies`.
pub async fn sync_terminals(
    db: &DbState,
    client: &MollieClient,
    accepted_currencies: &[String],
) -> Result<SyncSummary, String> {
    let remote = client.list_terminals().await.map_err(|e| e.to_string())?;

    let mut terminals = Vec::with_capacity(remote.len());
    for value in &remote {
        let Some(terminal) = parse_remote(value) else {
            warn!("skipping Mollie terminal without id: {value}");
            continue;
        };
        if !accepted_currencies
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&terminal.currency))
        {
            return Err(format!(
                "Currency {} is not active. Please activate it first.",
                terminal.currency
            ));
        }
        terminals.push(terminal);
    }

    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let tx = conn.transaction().map_err(|e| e.to_string())?;
    let mut summary = SyncSummary::default();
    for t in &terminals {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM mollie_terminals WHERE terminal_id = ?1",
                params![t.terminal_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())?;

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE mollie_terminals
                     SET name = ?1, profile_id = ?2, serial_number = ?3, status = ?4,
                         currency = ?5, updated_at = datetime('now')
                     WHERE id = ?6",
                    params![
                        t.name,
                        t.profile_id,
                        t.serial_number,
                        t.status,
                        t.currency,
                        id
                    ],
                )
                .map_err(|e| e.to_string())?;
                summary.updated += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO mollie_terminals
                        (terminal_id, name, profile_id, serial_number, status, currency)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        t.terminal_id,
                        t.name,
                        t.profile_id,
                        t.serial_number,
                        t.status,
                        t.currency
                    ],
                )
                .map_err(|e| e.to_string())?;
                summary.created += 1;
            }
        }
    }
    tx.commit().map_err(|e| e.to_string())?;

    info!(
        created = summary.created,
        updated = summary.updated,
        "Mollie terminals synced"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn list_terminals(db: &DbState, active_only: bool) -> Result<Vec<TerminalRecord>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let sql = if active_only {
        format!("SELECT {TERMINAL_COLUMNS} FROM mollie_terminals WHERE status = 'active' ORDER BY id")
    } else {
        format!("SELECT {TERMINAL_COLUMNS} FROM mollie_terminals ORDER BY id")
    };
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], TerminalRecord::from_row)
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())
}

fn find_terminal(conn: &Connection, terminal_id: &str) -> Result<Option<TerminalRecord>, String> {
    conn.query_row(
        &format!("SELECT {TERMINAL_COLUMNS} FROM mollie_terminals WHERE terminal_id = ?1"),
        params![terminal_id],
        TerminalRecord::from_row,
    )
    .optional()
    .map_err(|e| e.to_string())
}

/// Point a POS payment method at an active Mollie terminal. The payment
/// method row is created when it does not exist yet.
pub fn assign_terminal(
    db: &DbState,
    method_id: i64,
    method_name: &str,
    terminal_id: &str,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let terminal = find_terminal(&conn, terminal_id)?
        .ok_or_else(|| format!("Mollie terminal {terminal_id} not found"))?;
    if !terminal.is_active() {
        return Err(format!(
            "Mollie terminal {terminal_id} is {} and cannot be assigned",
            terminal.status
        ));
    }

    conn.execute(
        "INSERT INTO pos_payment_methods (id, name, mollie_terminal_id, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            mollie_terminal_id = excluded.mollie_terminal_id,
            updated_at = excluded.updated_at",
        params![method_id, method_name, terminal.id],
    )
    .map_err(|e| format!("assign_terminal: {e}"))?;

    info!(method_id, terminal = %terminal_id, "Mollie terminal assigned to payment method");
    Ok(())
}

/// Terminal assigned to a POS payment method, if any.
pub fn terminal_for_method(db: &DbState, method_id: i64) -> Result<Option<TerminalRecord>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row(
        "SELECT t.id, t.terminal_id, t.name, t.profile_id, t.serial_number, t.status, t.currency
         FROM pos_payment_methods m
         JOIN mollie_terminals t ON t.id = m.mollie_terminal_id
         WHERE m.id = ?1",
        params![method_id],
        TerminalRecord::from_row,
    )
    .optional()
    .map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::open_for_test;
    use crate::mollie::client::tests::spawn_mock;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::time::Duration;

    /// Insert a terminal row directly.
    pub(crate) fn insert_terminal(db: &DbState, terminal_id: &str, status: &str) -> i64 {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO mollie_terminals (terminal_id, name, status, currency) VALUES (?1, ?2, ?3, 'EUR')",
            params![terminal_id, format!("Counter {terminal_id}"), status],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn terminals_router(terminals: Value) -> Router {
        Router::new().route(
            "/v2/terminals",
            get(move || {
                let terminals = terminals.clone();
                async move {
                    Json(json!({
                        "count": terminals.as_array().map_or(0, |a| a.len()),
                        "_embedded": {"terminals": terminals},
                        "_links": {"next": null},
                    }))
                }
            }),
        )
    }

    fn eur() -> Vec<String> {
        vec!["EUR".to_string()]
    }

    #[tokio::test]
    async fn test_sync_upserts_by_terminal_id() {
        let db = open_for_test();
        insert_terminal(&db, "term_1", "pending");

        let base = spawn_mock(terminals_router(json!([
            {"id": "term_1", "description": "Front desk", "profileId": "pfl_1",
             "serialNumber": "SN-1", "status": "active", "currency": "EUR"},
            {"id": "term_2", "description": "Bar", "profileId": "pfl_1",
             "serialNumber": "SN-2", "status": "inactive", "currency": "EUR"},
        ])))
        .await;
        let client = MollieClient::new(&base, "key", Duration::from_secs(5)).unwrap();

        let summary = sync_terminals(&db, &client, &eur()).await.unwrap();
        assert_eq!(summary, SyncSummary { created: 1, updated: 1 });

        let all = list_terminals(&db, false).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name.as_deref(), Some("Front desk"));
        assert_eq!(all[0].serial_number.as_deref(), Some("SN-1"));

        let active = list_terminals(&db, true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].terminal_id, "term_1");
    }

    #[tokio::test]
    async fn test_sync_rejects_inactive_currency() {
        let db = open_for_test();
        let base = spawn_mock(terminals_router(json!([
            {"id": "term_1", "status": "active", "currency": "EUR"},
            {"id": "term_2", "status": "active", "currency": "CHF"},
        ])))
        .await;
        let client = MollieClient::new(&base, "key", Duration::from_secs(5)).unwrap();

        let err = sync_terminals(&db, &client, &eur()).await.unwrap_err();
        assert_eq!(err, "Currency CHF is not active. Please activate it first.");
        assert!(list_terminals(&db, false).unwrap().is_empty());
    }

    #[test]
    fn test_assign_requires_active_terminal() {
        let db = open_for_test();
        insert_terminal(&db, "term_on", "active");
        insert_terminal(&db, "term_off", "inactive");

        assert!(assign_terminal(&db, 3, "Mollie", "term_missing").is_err());
        assert!(assign_terminal(&db, 3, "Mollie", "term_off").is_err());
        assert_eq!(terminal_for_method(&db, 3).unwrap(), None);

        assign_terminal(&db, 3, "Mollie", "term_on").unwrap();
        let terminal = terminal_for_method(&db, 3).unwrap().unwrap();
        assert_eq!(terminal.terminal_id, "term_on");
        assert!(terminal.is_active());
    }

    #[test]
    fn test_parse_remote_defaults_unknown_status() {
        let t = parse_remote(&json!({"id": "term_x", "status": "exploded", "currency": "EUR"}))
            .unwrap();
        assert_eq!(t.status, "inactive");
        assert!(parse_remote(&json!({"status": "active"})).is_none());
    }
}
