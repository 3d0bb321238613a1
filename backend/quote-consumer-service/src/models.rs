//! Quote records as consumed from the stream

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A decoded quote with a usable logical identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    /// Unique logical message id, the idempotency key
    pub id: String,
    pub ticker: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Wire shape of a quote message.
///
/// Producers emit either camelCase or snake_case names, and older producers
/// call the id `messageId`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuotePayload {
    #[serde(default, alias = "messageId", alias = "message_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub ticker: String,
    pub price: Decimal,
    #[serde(alias = "observed_at")]
    pub observed_at: DateTime<Utc>,
}

/// Outbox-style envelope some producers wrap payloads in
#[derive(Debug, Deserialize)]
pub(crate) struct EventEnvelope<T> {
    pub data: T,
}
