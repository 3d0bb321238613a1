//! In-process idempotency store

use crate::{validate_event_id, IdempotencyResult, IdempotencyStore};
use async_trait::async_trait;
use dashmap::DashSet;
use tracing::debug;

/// Set of applied ids held in memory.
///
/// Safe to share between workers in one process: claims and `mark_applied`
/// are atomic insert-if-absent operations. Contents are lost on restart, so
/// redelivered messages after a restart are applied again.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    applied: DashSet<String>,
    claimed: DashSet<String>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct ids recorded
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn contains(&self, event_id: &str) -> IdempotencyResult<bool> {
        validate_event_id(event_id)?;
        Ok(self.applied.contains(event_id))
    }

    async fn mark_applied(&self, event_id: &str) -> IdempotencyResult<bool> {
        validate_event_id(event_id)?;

        // Insert before dropping the claim so a concurrent try_claim always
        // sees one of the two.
        let was_inserted = self.applied.insert(event_id.to_string());
        self.claimed.remove(event_id);
        if !was_inserted {
            debug!(event_id = %event_id, "Event already marked as applied (duplicate)");
        }

        Ok(was_inserted)
    }

    async fn try_claim(&self, event_id: &str) -> IdempotencyResult<bool> {
        validate_event_id(event_id)?;

        if self.applied.contains(event_id) {
            return Ok(false);
        }
        if !self.claimed.insert(event_id.to_string()) {
            debug!(event_id = %event_id, "Event already claimed by another worker");
            return Ok(false);
        }
        // The previous holder may have finished between the two checks
        if self.applied.contains(event_id) {
            self.claimed.remove(event_id);
            return Ok(false);
        }

        Ok(true)
    }

    async fn release(&self, event_id: &str) -> IdempotencyResult<()> {
        validate_event_id(event_id)?;
        self.claimed.remove(event_id);
        Ok(())
    }
}
