//! PostgreSQL-backed idempotency store

use crate::{validate_event_id, IdempotencyError, IdempotencyResult, IdempotencyStore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

/// Creates the `processed_events` table
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Default age after which an unfinished claim can be taken over
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(300);

/// Applied ids kept in the `processed_events` table.
///
/// Survives restarts and can be shared by every consumer instance in a group.
/// Each row is either `claimed` (an apply is in flight) or `applied`. Claims
/// and marks rely on the primary key with `ON CONFLICT`, so concurrent
/// inserts of the same id resolve to exactly one winner. A claim left behind
/// by a crashed worker can be taken over once it is older than the claim
/// timeout.
///
/// # Example
///
/// ```ignore
/// use idempotent_consumer::{IdempotencyStore, PgIdempotencyStore};
/// use std::time::Duration;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// // 7 days retention
/// let store = PgIdempotencyStore::new(pool, Duration::from_secs(7 * 86400));
/// if store.try_claim("quote-123").await? {
///     // apply the effect, then
///     store.mark_applied("quote-123").await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
    retention_duration: Duration,
    claim_timeout: Duration,
}

impl PgIdempotencyStore {
    /// Create a store over an existing pool
    ///
    /// # Retention Guidelines
    ///
    /// Keep ids at least as long as the topic retention, otherwise a replay from
    /// the earliest offset can re-apply messages whose ids were already cleaned up.
    pub fn new(pool: PgPool, retention_duration: Duration) -> Self {
        Self {
            pool,
            retention_duration,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }

    /// Age after which another worker may take over an unfinished claim.
    ///
    /// Keep it above the longest apply attempt, otherwise a slow but live
    /// worker can lose its claim.
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention_duration
    }

    /// Delete ids older than the retention window
    ///
    /// Should be called periodically (e.g. hourly from a background task).
    ///
    /// # Returns
    ///
    /// Number of ids deleted
    pub async fn cleanup_old_events(&self) -> IdempotencyResult<u64> {
        let cutoff_time = Utc::now()
            - chrono::Duration::from_std(self.retention_duration).map_err(|e| {
                IdempotencyError::Other(anyhow::anyhow!("Invalid retention duration: {}", e))
            })?;

        let result = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE processed_at < $1
            "#,
        )
        .bind(cutoff_time)
        .execute(&self.pool)
        .await
        .context("Failed to cleanup old events")?;

        let deleted_count = result.rows_affected();

        if deleted_count > 0 {
            info!(
                deleted_count = deleted_count,
                cutoff_time = %cutoff_time,
                "Cleaned up old processed events"
            );
        } else {
            debug!("No old events to cleanup");
        }

        Ok(deleted_count)
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn contains(&self, event_id: &str) -> IdempotencyResult<bool> {
        validate_event_id(event_id)?;

        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events
                WHERE event_id = $1 AND status = 'applied'
            ) AS exists
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        let exists: bool = row.try_get("exists")?;

        if exists {
            debug!(event_id = %event_id, "Event already applied");
        }

        Ok(exists)
    }

    async fn mark_applied(&self, event_id: &str) -> IdempotencyResult<bool> {
        validate_event_id(event_id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, processed_at, status)
            VALUES ($1, NOW(), 'applied')
            ON CONFLICT (event_id) DO UPDATE
                SET status = 'applied', processed_at = NOW()
                WHERE processed_events.status = 'claimed'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        let was_inserted = result.rows_affected() > 0;

        if !was_inserted {
            debug!(event_id = %event_id, "Event already marked as applied (duplicate)");
        }

        Ok(was_inserted)
    }

    async fn try_claim(&self, event_id: &str) -> IdempotencyResult<bool> {
        validate_event_id(event_id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, processed_at, status)
            VALUES ($1, NOW(), 'claimed')
            ON CONFLICT (event_id) DO UPDATE
                SET processed_at = NOW()
                WHERE processed_events.status = 'claimed'
                  AND processed_events.processed_at < NOW() - make_interval(secs => $2)
            "#,
        )
        .bind(event_id)
        .bind(self.claim_timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() > 0;

        if !claimed {
            debug!(event_id = %event_id, "Event already applied or claimed");
        }

        Ok(claimed)
    }

    async fn release(&self, event_id: &str) -> IdempotencyResult<()> {
        validate_event_id(event_id)?;

        sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE event_id = $1 AND status = 'claimed'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
