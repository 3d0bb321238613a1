//! Consumption loop
//!
//! One loop owns one stream subscription. Each decoded quote goes through
//! the circuit breaker, which wraps the retry policy, which wraps
//! [`RecordApplier::apply`]. A quote rejected by an open breaker stays
//! pending and is offered again before anything else is fetched, so quotes
//! are never lost to an open circuit and keep their order.

use crate::applier::{ApplyOutcome, RecordApplier};
use crate::decoder::{JsonQuoteDecoder, QuoteDecoder};
use crate::metrics;
use crate::models::QuoteRecord;
use crate::stream::{MessageStream, StreamGuard};
use resilience::{
    with_retry, CircuitBreaker, CircuitBreakerError, ConsumerResilienceConfig, RetryConfig,
    ShutdownSignal,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Per-loop counters returned when the loop stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub applied: u64,
    pub skipped: u64,
    pub decode_failures: u64,
    /// Times a pending quote was turned away by an open breaker
    pub breaker_rejections: u64,
    /// Fetch errors plus quotes dropped after exhausting their retries
    pub unexpected_errors: u64,
}

impl ConsumerStats {
    /// Log every counter once the loop has stopped
    pub fn log_summary(&self) {
        info!(
            applied = self.applied,
            skipped = self.skipped,
            decode_failures = self.decode_failures,
            breaker_rejections = self.breaker_rejections,
            unexpected_errors = self.unexpected_errors,
            "Worker finished"
        );
    }
}

pub struct QuoteConsumer<S, D = JsonQuoteDecoder> {
    stream: S,
    decoder: D,
    applier: Arc<RecordApplier>,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    open_fallback_delay: Duration,
    error_fallback_delay: Duration,
    shutdown: ShutdownSignal,
}

impl<S: MessageStream> QuoteConsumer<S> {
    pub fn new(
        stream: S,
        applier: Arc<RecordApplier>,
        resilience: ConsumerResilienceConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        let breaker = CircuitBreaker::new(resilience.circuit_breaker)
            .with_on_open(|reason| {
                warn!(reason = %reason, "Circuit breaker opened, pausing quote processing")
            })
            .with_on_reset(|| info!("Circuit breaker closed, resuming quote processing"));

        Self {
            stream,
            decoder: JsonQuoteDecoder,
            applier,
            breaker,
            retry: resilience.retry,
            open_fallback_delay: resilience.open_fallback_delay,
            error_fallback_delay: resilience.error_fallback_delay,
            shutdown,
        }
    }
}

impl<S: MessageStream, D: QuoteDecoder> QuoteConsumer<S, D> {
    pub fn with_decoder<D2: QuoteDecoder>(self, decoder: D2) -> QuoteConsumer<S, D2> {
        QuoteConsumer {
            stream: self.stream,
            decoder,
            applier: self.applier,
            breaker: self.breaker,
            retry: self.retry,
            open_fallback_delay: self.open_fallback_delay,
            error_fallback_delay: self.error_fallback_delay,
            shutdown: self.shutdown,
        }
    }

    /// Handle to this loop's breaker. Shares state with the loop.
    pub fn breaker(&self) -> CircuitBreaker {
        self.breaker.clone()
    }

    /// Run until shutdown is requested. The stream is closed on return.
    pub async fn run(self) -> ConsumerStats {
        let QuoteConsumer {
            stream,
            decoder,
            applier,
            breaker,
            retry,
            open_fallback_delay,
            error_fallback_delay,
            shutdown,
        } = self;

        let mut stream = StreamGuard::new(stream);
        let mut stats = ConsumerStats::default();
        let mut pending: Option<QuoteRecord> = None;

        info!("Starting quote consumer loop");

        while !shutdown.is_shutdown() {
            let quote = match pending.take() {
                Some(quote) => quote,
                None => {
                    let fetched = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        fetched = stream.fetch_next() => fetched,
                    };

                    let message = match fetched {
                        Ok(message) => message,
                        Err(e) => {
                            stats.unexpected_errors += 1;
                            metrics::record_message("fetch_error");
                            error!(error = %e, delay = ?error_fallback_delay, "Failed to fetch message");
                            if !shutdown.sleep(error_fallback_delay).await {
                                break;
                            }
                            continue;
                        }
                    };

                    match decoder.decode(message.payload.as_deref().unwrap_or_default()) {
                        Ok(quote) => quote,
                        Err(e) => {
                            stats.decode_failures += 1;
                            metrics::record_message("decode_failed");
                            warn!(
                                partition = message.partition,
                                offset = message.offset,
                                error = %e,
                                "Failed to decode quote, skipping"
                            );
                            continue;
                        }
                    }
                }
            };

            let started = Instant::now();
            let result = breaker
                .call(|| with_retry(&retry, &shutdown, || applier.apply(&quote)))
                .await;

            match result {
                Ok(outcome) => {
                    metrics::record_apply_duration(started.elapsed());
                    match outcome {
                        ApplyOutcome::Applied => {
                            stats.applied += 1;
                            metrics::record_message("applied");
                        }
                        ApplyOutcome::Skipped => {
                            stats.skipped += 1;
                            metrics::record_message("skipped");
                        }
                    }
                }
                Err(CircuitBreakerError::Open) => {
                    stats.breaker_rejections += 1;
                    metrics::record_message("rejected");
                    warn!(
                        event_id = %quote.id,
                        delay = ?open_fallback_delay,
                        "Circuit breaker open, holding quote"
                    );
                    pending = Some(quote);
                    if !shutdown.sleep(open_fallback_delay).await {
                        break;
                    }
                }
                Err(CircuitBreakerError::CallFailed(e)) if e.is_cancelled() => {
                    info!(
                        event_id = %quote.id,
                        attempts = e.attempts(),
                        "Shutdown requested while retrying quote"
                    );
                    break;
                }
                Err(CircuitBreakerError::CallFailed(e)) => {
                    stats.unexpected_errors += 1;
                    metrics::record_message("dropped");
                    metrics::record_apply_duration(started.elapsed());
                    error!(
                        event_id = %quote.id,
                        attempts = e.attempts(),
                        error = %e.last_error(),
                        delay = ?error_fallback_delay,
                        "Quote could not be applied, dropping"
                    );
                    if !shutdown.sleep(error_fallback_delay).await {
                        break;
                    }
                }
            }
        }

        drop(stream);
        info!(
            applied = stats.applied,
            skipped = stats.skipped,
            decode_failures = stats.decode_failures,
            breaker_rejections = stats.breaker_rejections,
            unexpected_errors = stats.unexpected_errors,
            "Quote consumer stopped"
        );
        stats
    }
}
