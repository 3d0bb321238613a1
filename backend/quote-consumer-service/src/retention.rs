//! Periodic pruning of old processed ids

use async_trait::async_trait;
use idempotent_consumer::{IdempotencyResult, PgIdempotencyStore};
use resilience::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics;

/// A store whose processed ids expire
#[async_trait]
pub trait RetentionCleanup: Send + Sync + 'static {
    /// Delete expired ids, returning how many were removed
    async fn cleanup(&self) -> IdempotencyResult<u64>;
}

#[async_trait]
impl RetentionCleanup for PgIdempotencyStore {
    async fn cleanup(&self) -> IdempotencyResult<u64> {
        self.cleanup_old_events().await
    }
}

/// Run cleanup on startup and then every `interval` until shutdown
pub fn spawn_retention_cleanup<C: RetentionCleanup>(
    store: Arc<C>,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting retention cleanup");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Retention cleanup shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match store.cleanup().await {
                        Ok(deleted) => {
                            metrics::record_retention_run("success", deleted);
                            if deleted > 0 {
                                info!(deleted = deleted, "Removed expired processed ids");
                            }
                        }
                        Err(e) => {
                            metrics::record_retention_run("error", 0);
                            warn!(error = %e, "Retention cleanup failed, will retry next interval");
                        }
                    }
                }
            }
        }
    })
}
