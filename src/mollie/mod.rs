//! Mollie REST API v2.

pub mod client;
pub mod payload;

pub use client::MollieClient;
pub use payload::{prepare_payment_payload, PaymentPayload};
