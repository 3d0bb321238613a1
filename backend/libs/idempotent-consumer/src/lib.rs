//! # Idempotent Consumer Library
//!
//! Tracks which logical message ids a consumer has already applied, so that
//! redelivery of the same message (at-least-once brokers, rebalances, restarts)
//! has no duplicate effect.
//!
//! ## Architecture
//!
//! ```text
//! Stream → Consumer → contains(id)? ──yes──→ skip
//!                          │no
//!                          ↓
//!                   try_claim(id)? ──lost──→ skip
//!                          │won
//!                          ↓
//!                   Business Effect ──failed──→ release(id)
//!                          │ok
//!                          ↓
//!                   mark_applied(id) → IdempotencyStore (memory / PostgreSQL)
//! ```
//!
//! The claim makes the apply decision atomic across workers sharing a store:
//! only the claim holder runs the effect.
//!
//! ## Stores
//!
//! - [`InMemoryIdempotencyStore`]: a concurrent set, for tests and single-process
//!   deployments that accept re-application after a restart.
//! - [`PgIdempotencyStore`]: the `processed_events` table (see
//!   `migrations/001_create_processed_events_table.sql`), shared by every consumer
//!   instance, with retention cleanup.
//!
//! ## Residual risk
//!
//! The effect and `mark_applied` are separate steps. A crash after the effect
//! but before `mark_applied` re-applies the message on redelivery once the
//! claim has expired. Closing that gap needs the effect and the mark in one
//! transaction (transactional outbox or a combined write).
//!
//! ## Usage Example
//!
//! ```ignore
//! use idempotent_consumer::{IdempotencyStore, InMemoryIdempotencyStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryIdempotencyStore::new();
//!
//! if !store.try_claim("event-123").await? {
//!     println!("Already applied or in flight, skipping");
//!     return Ok(());
//! }
//! match apply_effect().await {
//!     Ok(()) => store.mark_applied("event-123").await.map(|_| ())?,
//!     Err(e) => {
//!         store.release("event-123").await?;
//!         return Err(e);
//!     }
//! }
//! # Ok(())
//! # }
//! # async fn apply_effect() -> Result<(), Box<dyn std::error::Error>> { Ok(()) }
//! ```

use async_trait::async_trait;
use std::sync::Arc;

mod error;
mod memory;
mod postgres;

pub use error::{IdempotencyError, IdempotencyResult};
pub use memory::InMemoryIdempotencyStore;
pub use postgres::{PgIdempotencyStore, DEFAULT_CLAIM_TIMEOUT, MIGRATOR};

/// Longest id accepted by every store (matches the `VARCHAR(255)` column)
pub const MAX_EVENT_ID_LEN: usize = 255;

/// Membership set of applied message ids
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether the effect for `event_id` was already applied
    async fn contains(&self, event_id: &str) -> IdempotencyResult<bool>;

    /// Record `event_id` as applied.
    ///
    /// Atomic insert-if-absent: returns `true` when this call recorded the id,
    /// `false` when it was already present.
    async fn mark_applied(&self, event_id: &str) -> IdempotencyResult<bool>;

    /// Reserve `event_id` for one apply attempt.
    ///
    /// Of several concurrent callers at most one gets `true`, and nobody gets
    /// `true` for an applied id. The winner must follow up with either
    /// `mark_applied` or `release`.
    async fn try_claim(&self, event_id: &str) -> IdempotencyResult<bool>;

    /// Hand back a claim whose attempt failed so the id can be claimed again
    async fn release(&self, event_id: &str) -> IdempotencyResult<()>;
}

#[async_trait]
impl<S: IdempotencyStore + ?Sized> IdempotencyStore for Arc<S> {
    async fn contains(&self, event_id: &str) -> IdempotencyResult<bool> {
        (**self).contains(event_id).await
    }

    async fn mark_applied(&self, event_id: &str) -> IdempotencyResult<bool> {
        (**self).mark_applied(event_id).await
    }

    async fn try_claim(&self, event_id: &str) -> IdempotencyResult<bool> {
        (**self).try_claim(event_id).await
    }

    async fn release(&self, event_id: &str) -> IdempotencyResult<()> {
        (**self).release(event_id).await
    }
}

/// Validate an id before it reaches a store
pub fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
    if event_id.trim().is_empty() {
        return Err(IdempotencyError::InvalidEventId(
            "Event ID cannot be empty".to_string(),
        ));
    }

    let length = event_id.chars().count();
    if length > MAX_EVENT_ID_LEN {
        return Err(IdempotencyError::InvalidEventId(format!(
            "Event ID too long: {} characters (max {})",
            length,
            MAX_EVENT_ID_LEN
        )));
    }

    Ok(())
}
