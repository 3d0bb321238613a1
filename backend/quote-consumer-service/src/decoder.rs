//! Payload decoding

use crate::error::DecodeError;
use crate::models::{EventEnvelope, QuotePayload, QuoteRecord};
use idempotent_consumer::validate_event_id;

/// Turns a raw payload into a quote or a non-retriable [`DecodeError`]
pub trait QuoteDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<QuoteRecord, DecodeError>;
}

/// JSON decoder accepting a bare quote or an `{"data": quote}` envelope
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonQuoteDecoder;

impl QuoteDecoder for JsonQuoteDecoder {
    fn decode(&self, payload: &[u8]) -> Result<QuoteRecord, DecodeError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::EmptyPayload);
        }

        let payload = parse_enveloped_or_direct(payload)?;

        // Records without a usable id cannot be deduplicated
        let id = payload.id.unwrap_or_default();
        validate_event_id(&id).map_err(|e| DecodeError::InvalidId(e.to_string()))?;

        if payload.ticker.trim().is_empty() {
            return Err(DecodeError::MissingTicker { id });
        }

        Ok(QuoteRecord {
            id,
            ticker: payload.ticker,
            price: payload.price,
            observed_at: payload.observed_at,
        })
    }
}

fn parse_enveloped_or_direct(payload: &[u8]) -> Result<QuotePayload, DecodeError> {
    if let Ok(envelope) = serde_json::from_slice::<EventEnvelope<QuotePayload>>(payload) {
        return Ok(envelope.data);
    }

    Ok(serde_json::from_slice::<QuotePayload>(payload)?)
}
