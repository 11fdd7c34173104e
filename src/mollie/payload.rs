//! Mollie payment request payload.

use serde::Serialize;

use crate::terminal::protocol::PaymentRequest;

/// Path Mollie posts status changes to, relative to the public base URL.
pub const WEBHOOK_PATH: &str = "/pos_mollie/webhook/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Amount {
    pub currency: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMetadata {
    pub mollie_uid: String,
    pub order_id: String,
}

/// Body of `POST /v2/payments` for a point-of-sale payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub amount: Amount,
    pub description: String,
    pub webhook_url: String,
    pub redirect_url: String,
    pub method: String,
    pub terminal_id: String,
    pub metadata: PaymentMetadata,
}

/// Render an amount in cents the way Mollie wants it: `1250` -> `"12.50"`.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

pub fn webhook_url(base_url: &str) -> String {
    format!("{}{WEBHOOK_PATH}", base_url.trim().trim_end_matches('/'))
}

pub fn prepare_payment_payload(
    request: &PaymentRequest,
    terminal_id: &str,
    base_url: &str,
) -> PaymentPayload {
    let webhook = webhook_url(base_url);
    PaymentPayload {
        amount: Amount {
            currency: request.currency.clone(),
            value: format_amount(request.amount),
        },
        description: request.description.clone(),
        webhook_url: webhook.clone(),
        redirect_url: webhook,
        method: "pointofsale".to_string(),
        terminal_id: terminal_id.to_string(),
        metadata: PaymentMetadata {
            mollie_uid: request.mollie_uid.clone(),
            order_id: request.order_id.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1250), "12.50");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(100000), "1000.00");
        assert_eq!(format_amount(-250), "-2.50");
    }

    #[test]
    fn test_webhook_url_joins_base() {
        assert_eq!(
            webhook_url("https://shop.example.com/"),
            "https://shop.example.com/pos_mollie/webhook/"
        );
        assert_eq!(
            webhook_url("https://shop.example.com"),
            "https://shop.example.com/pos_mollie/webhook/"
        );
    }

    #[test]
    fn test_payload_wire_shape() {
        let request = PaymentRequest {
            mollie_uid: "uid-1".into(),
            description: "Shop/0001".into(),
            order_id: "ord-1".into(),
            currency: "EUR".into(),
            amount: 1250,
            session_key: "config-1".into(),
        };
        let payload = prepare_payment_payload(&request, "term_7VgQn4", "https://shop.example.com");
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "amount": {"currency": "EUR", "value": "12.50"},
                "description": "Shop/0001",
                "webhookUrl": "https://shop.example.com/pos_mollie/webhook/",
                "redirectUrl": "https://shop.example.com/pos_mollie/webhook/",
                "method": "pointofsale",
                "terminalId": "term_7VgQn4",
                "metadata": {"mollie_uid": "uid-1", "order_id": "ord-1"},
            })
        );
    }
}
