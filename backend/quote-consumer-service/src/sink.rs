//! Destination for applied quotes

use crate::error::SinkError;
use crate::models::QuoteRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

/// The side effect a quote triggers once applied
#[async_trait]
pub trait QuoteSink: Send + Sync {
    async fn persist(&self, quote: &QuoteRecord) -> Result<(), SinkError>;
}

/// Keeps every persisted quote in memory
#[derive(Debug, Default)]
pub struct InMemoryQuoteSink {
    quotes: RwLock<Vec<QuoteRecord>>,
}

impl InMemoryQuoteSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quotes(&self) -> Vec<QuoteRecord> {
        self.quotes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

#[async_trait]
impl QuoteSink for InMemoryQuoteSink {
    async fn persist(&self, quote: &QuoteRecord) -> Result<(), SinkError> {
        self.quotes.write().push(quote.clone());
        info!(
            event_id = %quote.id,
            ticker = %quote.ticker,
            price = %quote.price,
            "Quote saved"
        );
        Ok(())
    }
}
