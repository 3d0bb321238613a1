//! Idempotent application of a single quote

use crate::error::ApplyError;
use crate::models::QuoteRecord;
use crate::sink::QuoteSink;
use idempotent_consumer::IdempotencyStore;
use resilience::{with_timeout, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The side effect ran and the id is now recorded
    Applied,
    /// The id was already recorded or claimed by another worker, nothing ran
    Skipped,
}

/// Applies a quote's side effect at most once per id.
///
/// The id is claimed in the store before the sink runs, so workers sharing a
/// store never run the effect for the same id concurrently. A failed attempt
/// releases the claim and leaves the record eligible for a later retry. A
/// crash between the sink write and the id insert can still repeat the effect
/// once.
pub struct RecordApplier {
    store: Arc<dyn IdempotencyStore>,
    sink: Arc<dyn QuoteSink>,
    persist_timeout: Duration,
}

impl RecordApplier {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        sink: Arc<dyn QuoteSink>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            persist_timeout,
        }
    }

    pub async fn apply(&self, quote: &QuoteRecord) -> Result<ApplyOutcome, ApplyError> {
        let store_error = |source| ApplyError::Store {
            id: quote.id.clone(),
            source,
        };

        if self.store.contains(&quote.id).await.map_err(store_error)? {
            warn!(event_id = %quote.id, "Quote already applied, skipping");
            return Ok(ApplyOutcome::Skipped);
        }

        if !self.store.try_claim(&quote.id).await.map_err(store_error)? {
            warn!(event_id = %quote.id, "Quote is being applied by another worker, skipping");
            return Ok(ApplyOutcome::Skipped);
        }

        debug!(event_id = %quote.id, ticker = %quote.ticker, "Applying quote");

        let persisted = match with_timeout(self.persist_timeout, self.sink.persist(quote)).await {
            Ok(()) => Ok(()),
            Err(TimeoutError::Elapsed(timeout)) => Err(ApplyError::Timeout {
                id: quote.id.clone(),
                timeout,
            }),
            Err(TimeoutError::OperationFailed(source)) => Err(ApplyError::Persist {
                id: quote.id.clone(),
                source,
            }),
        };
        if let Err(e) = persisted {
            self.release_claim(&quote.id).await;
            return Err(e);
        }

        let newly_recorded = self
            .store
            .mark_applied(&quote.id)
            .await
            .map_err(store_error)?;
        if !newly_recorded {
            warn!(event_id = %quote.id, "Quote id was already recorded");
        }

        info!(
            event_id = %quote.id,
            ticker = %quote.ticker,
            price = %quote.price,
            "Quote applied"
        );
        Ok(ApplyOutcome::Applied)
    }

    /// A claim that cannot be released stays until it expires in the store
    async fn release_claim(&self, event_id: &str) {
        if let Err(e) = self.store.release(event_id).await {
            warn!(event_id = %event_id, error = %e, "Failed to release quote claim");
        }
    }
}
