//! Quote consumer worker
//!
//! Configuration comes from `config/quote-consumer.toml` and `QUOTES__*`
//! environment variables, for example:
//! - QUOTES__STREAM__ENDPOINT: Kafka bootstrap servers (default: "localhost:9092")
//! - QUOTES__STREAM__TOPIC: Topic to consume (default: "quotes-topic")
//! - QUOTES__IDEMPOTENCY__DATABASE_URL: PostgreSQL URL for processed ids (in-memory when unset)
//! - QUOTES__WORKERS: Number of consumer loops (default: 1)
//! - QUOTES__LOG__FORMAT: "pretty" or "json"

use anyhow::{Context, Result};
use idempotent_consumer::{IdempotencyStore, InMemoryIdempotencyStore, PgIdempotencyStore};
use quote_consumer::config::{LogFormat, LogSettings};
use quote_consumer::retention::spawn_retention_cleanup;
use quote_consumer::{Config, InMemoryQuoteSink, KafkaQuoteStream, QuoteConsumer, RecordApplier};
use resilience::ShutdownSignal;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "quote_consumer=info,resilience=info,idempotent_consumer=info";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config.log);

    config.validate()?;
    info!(
        endpoint = %config.stream.endpoint,
        topic = %config.stream.topic,
        consumer_group = %config.stream.consumer_group,
        workers = config.workers,
        "Starting quote consumer"
    );

    let (trigger, shutdown) = ShutdownSignal::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for ctrl+c, shutting down"),
        }
        trigger.trigger();
    });

    let (store, cleanup_handle) = match config.idempotency.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("Failed to connect to idempotency database")?;
            idempotent_consumer::MIGRATOR
                .run(&pool)
                .await
                .context("Failed to run idempotency migrations")?;
            let pg_store = Arc::new(PgIdempotencyStore::new(pool, config.retention()));
            let handle =
                spawn_retention_cleanup(pg_store.clone(), config.cleanup_interval(), shutdown.clone());
            info!(
                retention_days = config.idempotency.retention_days,
                "Using PostgreSQL idempotency store"
            );

            let store: Arc<dyn IdempotencyStore> = pg_store;
            (store, Some(handle))
        }
        None => {
            warn!("No idempotency database configured, processed ids will not survive a restart");
            let store: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotencyStore::new());
            (store, None)
        }
    };

    let sink = Arc::new(InMemoryQuoteSink::new());
    let applier = Arc::new(RecordApplier::new(store, sink, config.persist_timeout()));

    let mut workers = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        let stream = KafkaQuoteStream::connect(&config.stream)
            .with_context(|| format!("Failed to start consumer {worker_id}"))?;
        let consumer = QuoteConsumer::new(
            stream,
            applier.clone(),
            config.resilience(),
            shutdown.clone(),
        );
        workers.push(tokio::spawn(
            consumer.run().instrument(info_span!("worker", worker_id)),
        ));
    }

    for handle in workers {
        match handle.await {
            Ok(stats) => stats.log_summary(),
            Err(e) => error!(error = %e, "Worker task failed"),
        }
    }

    if let Some(handle) = cleanup_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Retention cleanup task failed");
        }
    }

    match quote_consumer::metrics::render() {
        Ok(snapshot) => debug!(metrics = %snapshot, "Final metrics snapshot"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }

    info!("Quote consumer stopped");
    Ok(())
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)));

    match log.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
